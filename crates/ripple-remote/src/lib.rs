//! Backend seams for the Ripple chat client.
//!
//! The managed services (document store, media CDN, push trigger) are
//! external collaborators. This crate defines the traits the client talks
//! through, a realtime [`Subscription`] handle, an in-process
//! [`MemoryBackend`], and reqwest clients for the HTTP endpoints.

pub mod backend;
pub mod endpoints;
pub mod error;
pub mod media;
pub mod memory;
pub mod notify;
pub mod subscription;

pub use backend::{ChangeKind, DocumentChange, DocumentStore};
pub use endpoints::{CdnUploader, EndpointClient};
pub use error::{RemoteError, Result};
pub use media::{public_id_from_url, MediaDeleter, MediaSigner, MediaUpload, MediaUploader};
pub use memory::{MemoryBackend, Operation};
pub use notify::PushNotifier;
pub use subscription::{Emitter, Subscription};
