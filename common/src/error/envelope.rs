use crate::error::error_location::ErrorLocation;

use thiserror::Error as ThisError;

/// Envelope authentication failures.
///
/// The first four variants are the freshness-check taxonomy: a request
/// rejected with any of them leaves the session's replay high-water mark
/// unchanged, so the caller may retry with a freshly sealed message.
#[derive(Debug, ThisError)]
pub enum EnvelopeError {
    /// Associated data did not parse as a millisecond timestamp.
    #[error("Invalid Format Error: {message} {location}")]
    InvalidFormat {
        message: String,
        location: ErrorLocation,
    },

    /// Timestamp at or below the high-water mark (replay or out-of-order).
    #[error("Expired Error: {message} {location}")]
    Expired {
        message: String,
        location: ErrorLocation,
    },

    /// Receiver-computed delta is negative: the sender's clock claims a
    /// moment the receiver has not reached yet.
    #[error("In Past Error: {message} {location}")]
    InPast {
        message: String,
        location: ErrorLocation,
    },

    /// Receiver-computed delta exceeds the jitter tolerance: the message
    /// is too old or was delayed beyond tolerance.
    #[error("In Future Error: {message} {location}")]
    InFuture {
        message: String,
        location: ErrorLocation,
    },

    /// Ciphertext failed to decrypt or its integrity tag did not verify.
    #[error("Decrypt Error: {message} {location}")]
    Decrypt {
        message: String,
        location: ErrorLocation,
    },

    #[error("Encrypt Error: {message} {location}")]
    Encrypt {
        message: String,
        location: ErrorLocation,
    },

    /// Decrypted payload did not deserialize into the expected shape
    /// (this includes an unrecognised request type tag).
    #[error("Payload Error: {message} {location}")]
    Payload {
        message: String,
        location: ErrorLocation,
    },
}
