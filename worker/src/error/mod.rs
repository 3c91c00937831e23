pub mod store;

pub use store::StoreError;

use common::ErrorLocation;
use common::error::envelope::EnvelopeError;
use common::error::session::SessionError;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Request-shape failure: the payload decoded but its content is
    /// unusable (e.g. a delete id that is not an integer).
    #[error("Request Error: {message} {location}")]
    Request {
        message: String,
        location: ErrorLocation,
    },

    #[error("Io Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },

    #[error("Logger Error: {message} {location}")]
    Logger {
        message: String,
        location: ErrorLocation,
    },
}

impl From<IoError> for WorkerError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        WorkerError::Io {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
