//! Types shared by every Ripple crate: identifiers, remote document shapes,
//! endpoint payloads and constants.

pub mod clock;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::SharedError;
pub use types::{ChatId, MediaType, MessageId, UserId};
