use common::ErrorLocation;
use common::error::envelope::EnvelopeError;
use common::error::session::SessionError;

use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum ClientError {
    #[error("HTTP Error: {message} {location}")]
    Http {
        message: String,
        location: ErrorLocation,
    },

    #[error("JSON Error: {message} {location}")]
    Json {
        message: String,
        location: ErrorLocation,
    },

    #[error("URL Parse Error: {message} {location}")]
    UrlParse {
        message: String,
        location: ErrorLocation,
    },

    #[error("Server Error: {message} {location}")]
    Server {
        message: String,
        location: ErrorLocation,
    },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<url::ParseError> for ClientError {
    #[track_caller]
    fn from(error: url::ParseError) -> Self {
        ClientError::UrlParse {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    #[track_caller]
    fn from(error: reqwest::Error) -> Self {
        ClientError::Http {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        ClientError::Json {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
