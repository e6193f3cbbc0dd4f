use thiserror::Error;

use ripple_remote::RemoteError;
use ripple_store::StoreError;

/// Errors surfaced by the chat client.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Local cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Backend error: {0}")]
    Remote(#[from] RemoteError),

    /// Blank text after trimming.
    #[error("Message is empty")]
    EmptyMessage,

    /// An operation that needs an open chat was called before `initialize`.
    #[error("Chat session not initialized")]
    NotInitialized,

    #[error("Chat session already initialized")]
    AlreadyInitialized,

    #[error("Chat session closed")]
    Closed,

    #[error("Cannot add yourself as a contact")]
    SelfContact,

    /// The job runner went away.
    #[error("Job queue closed")]
    JobQueueClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
