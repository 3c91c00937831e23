pub mod envelope;
pub mod error_location;
pub mod session;

pub use envelope::EnvelopeError;
pub use error_location::ErrorLocation;
pub use session::SessionError;
