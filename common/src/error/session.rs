use crate::error::error_location::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SessionError {
    #[error("Pem Error: {message} {location}")]
    Pem {
        message: String,
        location: ErrorLocation,
    },

    #[error("Key Error: {message} {location}")]
    Key {
        message: String,
        location: ErrorLocation,
    },

    #[error("Derive Error: {message} {location}")]
    Derive {
        message: String,
        location: ErrorLocation,
    },

    /// No remote public key has been installed yet; the session cannot
    /// encrypt or decrypt. Fatal to this attempt, not a crash.
    #[error("No Peer Key Error: {message} {location}")]
    NoPeerKey {
        message: String,
        location: ErrorLocation,
    },
}
