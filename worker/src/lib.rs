//! SyncBridge worker process library.
//!
//! The worker owns the live item state and serves it to exactly one host
//! process over loopback HTTP. Requests arrive as authenticated encrypted
//! envelopes; reads are long-polls that block until the state differs from
//! the baseline the host already holds.
//!
//! # Startup protocol
//!
//! The binary prints its public key as a PEM block to stdout (the host
//! captures it there), installs the host's public key from the `--token`
//! argument, creates the first item, and serves `POST /request` plus
//! `GET /health` on `127.0.0.1:{--port}` until ctrl-c.

pub mod dispatch;
pub mod error;
pub mod logging;
pub mod randomiser;
pub mod server;
pub mod store;

#[cfg(test)]
mod tests;

pub const WORKER_HOSTNAME: &str = "127.0.0.1";
