pub mod client;
pub mod config;
pub mod spawn;

pub use client::ClientError;
pub use config::ConfigError;
pub use spawn::SpawnError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Spawn(#[from] spawn::SpawnError),

    #[error(transparent)]
    Client(#[from] client::ClientError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
