//! Maps a decoded, authenticated request to the matching store operation.
//!
//! Unknown request types never reach this module: the tagged wire type
//! rejects them at decode time inside the envelope codec.

use crate::error::WorkerError;
use crate::store::ItemStore;

use common::ErrorLocation;
use common::envelope::EnvelopeCodec;
use common::wire::{SealedEnvelope, SyncRequest};

use std::panic::Location;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

/// Drive one request against the store.
///
/// Returns `Some(envelope)` for read requests that produce a sealed
/// response body, `None` for mutations acknowledged by status alone
/// (subsequent pings observe their effect).
///
/// # Errors
///
/// - [`WorkerError::Store`] — cancellation during the long-poll, or a
///   delete targeting a nonexistent id
/// - [`WorkerError::Request`] — a delete id that does not parse as an
///   integer
/// - [`WorkerError::Envelope`] — the response failed to seal
pub async fn dispatch(
    request: SyncRequest,
    store: &ItemStore,
    codec: &EnvelopeCodec,
    cancel: &CancellationToken,
) -> Result<Option<SealedEnvelope>, WorkerError> {
    match request {
        SyncRequest::Ping { items } => {
            debug!("Long-poll with baseline of {} pairs", items.len());
            let delta = store.diff_wait(&items, cancel).await?;
            let envelope = codec.seal(&delta)?;
            Ok(Some(envelope))
        }

        SyncRequest::AddItem => {
            let item = store.add().await;
            info!("Added item {} ({})", item.id, item.name);
            Ok(None)
        }

        SyncRequest::DeleteItem { id } => {
            let id: u64 = id.parse().map_err(|e| WorkerError::Request {
                message: format!("request identifier is not an integer: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;
            store.delete(id).await?;
            info!("Deleted item {id}");
            Ok(None)
        }
    }
}
