use common::ErrorLocation;

use sync_core::error::{ClientError, ConfigError, SpawnError};

use std::panic::Location;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// Error from this app (logging, filesystem, startup wiring)
    #[error("Host Error: {message} {location}")]
    Host {
        message: String,
        location: ErrorLocation,
    },

    /// Error from sync-core operations (spawn, client, config)
    #[error("Core Error: {message} {location}")]
    Core {
        message: String,
        location: ErrorLocation,
    },
}

impl From<SpawnError> for HostError {
    #[track_caller]
    fn from(error: SpawnError) -> Self {
        HostError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ClientError> for HostError {
    #[track_caller]
    fn from(error: ClientError) -> Self {
        HostError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ConfigError> for HostError {
    #[track_caller]
    fn from(error: ConfigError) -> Self {
        HostError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
