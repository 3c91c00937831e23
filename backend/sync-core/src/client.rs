//! The host's sealed long-poll client.

use crate::error::client::ClientError;

use common::ErrorLocation;
use common::envelope::EnvelopeCodec;
use common::item::{Item, ItemKey};
use common::wire::{SealedEnvelope, SyncRequest};

use std::panic::Location;
use std::sync::Arc;

use log::debug;
use reqwest::Client;
use url::Url;

const REQUEST_ENDPOINT: &str = "request";

/// One host-side session's view of the worker's `/request` endpoint.
///
/// The underlying HTTP client is built without a timeout: a ping is a
/// long-poll with no upper bound on blocking, and cancellation comes from
/// process shutdown rather than the transport.
#[derive(Clone)]
pub struct SyncClient {
    base_url: Url,
    client: Client,
    token: String,
    codec: Arc<EnvelopeCodec>,
}

impl SyncClient {
    pub fn new(
        base_url_str: &str,
        token: String,
        codec: Arc<EnvelopeCodec>,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url_str)?;
        let client = Client::builder().build()?;

        Ok(Self {
            base_url,
            client,
            token,
            codec,
        })
    }

    /// Seal a request, POST it, and return the raw response body (empty
    /// bodies become `None`).
    async fn publish(&self, request: &SyncRequest) -> Result<Option<String>, ClientError> {
        let envelope = self.codec.seal(request)?;
        let url = self.base_url.join(REQUEST_ENDPOINT)?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&envelope)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Server {
                message: format!(
                    "HTTP {} - {}",
                    response.status().as_u16(),
                    response.text().await.unwrap_or_default()
                ),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let body = response.text().await?;
        Ok(if body.is_empty() { None } else { Some(body) })
    }

    /// Long-poll for items differing from `baseline`. Blocks until the
    /// worker has something to say.
    pub async fn ping(&self, baseline: Vec<ItemKey>) -> Result<Vec<Item>, ClientError> {
        debug!("Pinging with baseline of {} pairs", baseline.len());

        let body = self
            .publish(&SyncRequest::Ping { items: baseline })
            .await?
            .ok_or_else(|| ClientError::Server {
                message: "long-poll response carried no body".to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;

        let sealed: SealedEnvelope = serde_json::from_str(&body)?;
        let items: Vec<Item> = self.codec.open(&sealed)?;

        debug!("Received {} changed items", items.len());
        Ok(items)
    }

    /// Ask the worker to create a new item. The next ping observes it.
    pub async fn add_item(&self) -> Result<(), ClientError> {
        self.publish(&SyncRequest::AddItem).await.map(|_| ())
    }

    /// Ask the worker to delete an item by id.
    pub async fn delete_item(&self, id: u64) -> Result<(), ClientError> {
        self.publish(&SyncRequest::DeleteItem { id: id.to_string() })
            .await
            .map(|_| ())
    }
}
