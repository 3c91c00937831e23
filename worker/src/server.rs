//! Loopback HTTP server for the worker.
//!
//! This server exists for exactly one peer: the host process that spawned
//! us. The security model is fail-closed and layered:
//!
//! - Binds to `127.0.0.1` only (no network exposure)
//! - Rejects non-loopback remote addresses regardless of token validity
//! - Compares the bearer token (constant time) before touching the body
//! - Only then opens the authenticated envelope
//!
//! All request failures map to non-2xx responses; nothing here crashes
//! the process.

use crate::dispatch::dispatch;
use crate::error::WorkerError;
use crate::store::ItemStore;

use common::ErrorLocation;
use common::envelope::EnvelopeCodec;
use common::wire::SealedEnvelope;

use std::net::SocketAddr;
use std::panic::Location;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use log::{info, warn};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const BEARER_PREFIX: &str = "Bearer ";

/// Shared state for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ItemStore>,
    pub codec: Arc<EnvelopeCodec>,
    pub token: Arc<String>,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/request", post(handle_request))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until the shutdown token fires.
///
/// Graceful shutdown cancels every in-flight diff-wait through the same
/// token, so no blocked long-poll survives the server.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), WorkerError> {
    let shutdown = state.shutdown.clone();

    info!(
        "Worker serving on {}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    .map_err(|e| WorkerError::Io {
        message: format!("server failed: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

/// Unauthenticated liveness probe used by the host's spawn readiness loop.
async fn health() -> StatusCode {
    StatusCode::OK
}

async fn handle_request(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> Response {
    // Local access only, before anything else.
    if !addr.ip().is_loopback() {
        warn!("Rejected non-loopback request from {addr}");
        return StatusCode::FORBIDDEN.into_response();
    }

    // Bearer token, before the body is even decoded.
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .unwrap_or_default();
    if !bool::from(bearer.as_bytes().ct_eq(state.token.as_bytes())) {
        warn!("Auth failure from {addr}");
        return (StatusCode::FORBIDDEN, "auth error").into_response();
    }

    let envelope: SealedEnvelope = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Malformed envelope from {addr}: {e}");
            return (StatusCode::BAD_REQUEST, format!("malformed envelope: {e}")).into_response();
        }
    };

    // Opening the envelope authenticates freshness and advances the
    // replay mark; a failure leaves the mark untouched.
    let request = match state.codec.open(&envelope) {
        Ok(request) => request,
        Err(e) => {
            warn!("Envelope rejected from {addr}: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match dispatch(request, &state.store, &state.codec, &state.shutdown).await {
        Ok(Some(sealed)) => (StatusCode::OK, Json(sealed)).into_response(),
        Ok(None) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!("Request failed: {e}");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
