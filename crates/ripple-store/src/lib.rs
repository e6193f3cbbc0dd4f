//! # ripple-store
//!
//! Local message cache for the Ripple chat client, backed by SQLite.
//!
//! [`Database`] is the synchronous `rusqlite` handle with typed CRUD helpers.
//! [`MessageCache`] wraps it for async callers and exposes per-chat live
//! queries that re-emit on every write.

pub mod cache;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use cache::{LiveQuery, MessageCache};
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
