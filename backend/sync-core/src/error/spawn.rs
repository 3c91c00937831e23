use common::ErrorLocation;
use common::error::session::SessionError;

use std::error::Error as StdError;
use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SpawnError {
    #[error("Spawn Error: {message} {location}")]
    Spawn {
        message: String,
        location: ErrorLocation,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("Handshake Error: {message} {location}")]
    Handshake {
        message: String,
        location: ErrorLocation,
    },

    #[error("Parse Error: {message} {location}")]
    Parse {
        message: String,
        location: ErrorLocation,
    },

    #[error("Timeout Error: {message} {location}")]
    Timeout {
        message: String,
        location: ErrorLocation,
    },
}

impl From<SessionError> for SpawnError {
    #[track_caller]
    fn from(error: SessionError) -> Self {
        SpawnError::Handshake {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
