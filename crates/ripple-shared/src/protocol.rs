//! Document shapes exchanged with the remote document store and the HTTP
//! side endpoints.
//!
//! Field names follow the wire (camelCase for documents, whatever the
//! endpoint expects for HTTP payloads). Every document decodes leniently:
//! missing fields fall back to their defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SharedError;
use crate::types::UserId;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A message document under `chats/{chatId}/messages/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageDoc {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    /// Epoch millis.
    pub timestamp: Option<i64>,
    pub edited: bool,
    pub media_url: Option<String>,
    pub is_media: bool,
    pub media_type: Option<String>,
}

/// The chat document under `chats/{chatId}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatDoc {
    pub last_message: Option<String>,
    pub last_timestamp: Option<i64>,
    pub typing: BTreeMap<String, bool>,
    pub auto_delete_after_millis: Option<i64>,
    pub auto_delete_start_time: Option<i64>,
}

impl ChatDoc {
    pub fn is_typing(&self, user: &UserId) -> bool {
        self.typing.get(user.as_str()).copied().unwrap_or(false)
    }

    pub fn auto_delete_after(&self) -> Option<Duration> {
        self.auto_delete_after_millis
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    /// Epoch millis at which the scheduled purge is due, if one is active.
    ///
    /// The retention window runs from the later of the explicit start marker
    /// and the last message.
    pub fn purge_due_at(&self) -> Option<i64> {
        let after = self.auto_delete_after_millis.filter(|ms| *ms > 0)?;
        let anchor = match (self.auto_delete_start_time, self.last_timestamp) {
            (Some(start), Some(last)) => start.max(last),
            (Some(start), None) => start,
            (None, Some(last)) => last,
            (None, None) => return None,
        };
        Some(anchor.saturating_add(after))
    }

    /// Merge an update into the document, the way a merge-set on the backend
    /// would.
    pub fn apply(&mut self, update: &ChatUpdate) {
        match update {
            ChatUpdate::LastMessage { text, timestamp } => {
                self.last_message = Some(text.clone());
                self.last_timestamp = Some(*timestamp);
            }
            ChatUpdate::Typing { user, typing } => {
                self.typing.insert(user.0.clone(), *typing);
            }
            ChatUpdate::AutoDelete {
                after_millis,
                start_time,
            } => {
                self.auto_delete_after_millis = *after_millis;
                self.auto_delete_start_time = *start_time;
            }
            ChatUpdate::ClearHistory => {
                self.last_message = None;
                self.last_timestamp = None;
                self.auto_delete_after_millis = None;
                self.auto_delete_start_time = None;
            }
        }
    }
}

/// Partial write to a chat document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    /// Preview shown on the dashboard.
    LastMessage { text: String, timestamp: i64 },
    /// `typing.{uid}`
    Typing { user: UserId, typing: bool },
    /// `None` duration switches auto-delete off.
    AutoDelete {
        after_millis: Option<i64>,
        start_time: Option<i64>,
    },
    /// Written by the purge job once all messages are gone.
    ClearHistory,
}

/// `presence/{uid}`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceDoc {
    pub online: bool,
    pub last_seen: i64,
}

/// `users/{owner}/contacts/{peer}`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactDoc {
    pub added_at: i64,
}

/// `users/{uid}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    #[serde(skip)]
    pub uid: String,
    pub name: String,
    pub email: String,
    /// Lower-cased name, used for prefix search.
    pub username_index: String,
    pub profile_image_url: Option<String>,
    pub fcm_token: Option<String>,
}

impl UserProfile {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: uid.into(),
            username_index: name.to_lowercase(),
            name,
            email: email.into(),
            profile_image_url: None,
            fcm_token: None,
        }
    }
}

/// Decode a raw document, reporting a shape mismatch as [`SharedError::Decode`].
pub fn decode_document<T: DeserializeOwned>(raw: serde_json::Value) -> Result<T, SharedError> {
    if !raw.is_object() {
        return Err(SharedError::NotAnObject);
    }
    Ok(serde_json::from_value(raw)?)
}

// ---------------------------------------------------------------------------
// HTTP side endpoints
// ---------------------------------------------------------------------------

/// Response of `POST /cloudinary-auth`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadAuthorization {
    pub signature: String,
    pub timestamp: i64,
    pub upload_preset: String,
    pub cloud_name: String,
    pub api_key: String,
}

/// The part of a CDN upload response we keep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedMedia {
    pub secure_url: String,
    pub public_id: String,
}

/// Body of `POST /send-fcm-notification`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub recipient_id: String,
    pub sender_id: String,
    pub title: String,
    pub message_text: String,
    pub chat_id: String,
}

/// Body of `POST /cloudinary-delete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDeleteRequest {
    pub public_id: String,
}
