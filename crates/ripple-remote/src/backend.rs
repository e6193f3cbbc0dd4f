//! The remote document store seam.
//!
//! The managed document database is an external collaborator. Everything the
//! client needs from it goes through [`DocumentStore`]; realtime listeners
//! are exposed as [`Subscription`]s.

use std::collections::BTreeSet;

use async_trait::async_trait;

use ripple_shared::protocol::{
    ChatDoc, ChatUpdate, ContactDoc, MessageDoc, PresenceDoc, UserProfile,
};
use ripple_shared::{ChatId, MessageId, UserId};

use crate::error::Result;
use crate::subscription::Subscription;

/// What happened to a document between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a snapshot diff, carrying the raw document.
///
/// `data` is the document body as stored; for `Removed` it is the last
/// known body.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub doc_id: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ------------------------------------------------------------------
    // chats/{chatId}/messages
    // ------------------------------------------------------------------

    /// Create or overwrite `chats/{chat}/messages/{doc.id}`.
    async fn set_message(&self, chat_id: &ChatId, doc: MessageDoc) -> Result<()>;

    /// Replace the text and set `edited`.
    async fn edit_message(&self, chat_id: &ChatId, id: &MessageId, text: &str) -> Result<()>;

    async fn delete_message(&self, chat_id: &ChatId, id: &MessageId) -> Result<()>;

    /// Every message of a chat, ordered by timestamp.
    async fn list_messages(&self, chat_id: &ChatId) -> Result<Vec<MessageDoc>>;

    /// Realtime listener over the chat's messages ordered by timestamp. The
    /// first batch reports every existing document as `Added`; later batches
    /// carry only the diff, in whatever order the backend produced it.
    fn watch_messages(&self, chat_id: &ChatId) -> Result<Subscription<Vec<DocumentChange>>>;

    // ------------------------------------------------------------------
    // chats/{chatId}
    // ------------------------------------------------------------------

    /// Merge-write into the chat document, creating it if needed.
    async fn update_chat(&self, chat_id: &ChatId, update: ChatUpdate) -> Result<()>;

    async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<ChatDoc>>;

    /// Emits the current document, then every change to it.
    fn watch_chat(&self, chat_id: &ChatId) -> Result<Subscription<Option<ChatDoc>>>;

    // ------------------------------------------------------------------
    // presence/{uid}
    // ------------------------------------------------------------------

    async fn set_presence(&self, user: &UserId, presence: PresenceDoc) -> Result<()>;

    async fn get_presence(&self, user: &UserId) -> Result<Option<PresenceDoc>>;

    fn watch_presence(&self, user: &UserId) -> Result<Subscription<Option<PresenceDoc>>>;

    // ------------------------------------------------------------------
    // users/{uid} and users/{uid}/contacts
    // ------------------------------------------------------------------

    async fn put_user(&self, profile: UserProfile) -> Result<()>;

    /// Profiles for the given ids; unknown ids are skipped.
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<UserProfile>>;

    /// Users whose username index starts with `prefix`.
    async fn search_users(&self, prefix: &str, limit: usize) -> Result<Vec<UserProfile>>;

    async fn add_contact(&self, owner: &UserId, peer: &UserId, contact: ContactDoc) -> Result<()>;

    /// Ids of the owner's contacts.
    async fn list_contacts(&self, owner: &UserId) -> Result<Vec<UserId>>;

    /// Emits the owner's current contact ids, then the full set on each change.
    fn watch_contacts(&self, owner: &UserId) -> Result<Subscription<BTreeSet<UserId>>>;
}
