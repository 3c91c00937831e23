use common::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum StoreError {
    /// The targeted item does not exist. Reportable to the caller, never
    /// fatal to the store.
    #[error("Not Found Error: {message} {location}")]
    NotFound {
        message: String,
        location: ErrorLocation,
    },

    /// The caller's context was cancelled while a diff-wait was blocked.
    #[error("Cancelled Error: {message} {location}")]
    Cancelled {
        message: String,
        location: ErrorLocation,
    },
}
