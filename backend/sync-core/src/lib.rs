//! Host-side core: worker process supervision, the stdout keepalive
//! watchdog, the sealed long-poll client, and host configuration.

pub mod client;
pub mod config;
pub mod error;
pub mod spawn;
pub mod watchdog;


pub const WORKER_BINARY: &str = "syncbridge-worker";
pub const WORKER_HOSTNAME: &str = "127.0.0.1";
pub const WORKER_BASE_URL: &str = const_format::concatcp!("http://", WORKER_HOSTNAME);
