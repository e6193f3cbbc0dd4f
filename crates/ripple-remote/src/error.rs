use thiserror::Error;

use ripple_shared::SharedError;

/// Errors produced when talking to the backend services.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The backend refused the write (rules, quota, ...).
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// The backend could not be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A side endpoint answered with a non-success status.
    #[error("Endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(#[from] SharedError),

    #[error("Subscription closed")]
    SubscriptionClosed,

    #[error("Media too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RemoteError>;
