//! Shared building blocks for the SyncBridge host and worker processes.
//!
//! Both sides of the loopback protocol link this crate. It contains pure
//! data types plus the two pieces of logic that must be byte-identical in
//! both processes:
//!
//! - **item**: the observable unit of state and its `(id, status)` baseline
//!   key used by the diff-wait comparison.
//! - **wire**: the tagged request type and the sealed envelope that wraps
//!   every request and response on the wire.
//! - **session**: x25519 key exchange, PEM/bearer-token encoding of public
//!   keys, and derivation of the shared AES-256-GCM key.
//! - **envelope**: the authenticated envelope codec with the replay
//!   high-water mark.
//!
//! ## Architecture
//!
//! - **common** (this crate): shared data + codec
//! - **sync-core**: host-side business logic (spawn, client, watchdog)
//! - **worker**: the detached worker process (store, dispatcher, server)
//! - **host**: application wiring everything together

pub mod envelope;
pub mod error;
pub mod item;
pub mod session;
pub mod wire;

#[cfg(test)]
mod tests;

pub use error::error_location::ErrorLocation;
