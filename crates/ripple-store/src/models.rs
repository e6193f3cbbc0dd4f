//! Domain model structs persisted in the local cache.
//!
//! Every struct derives `Serialize` so it can be handed directly to the UI
//! layer.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use ripple_shared::{ChatId, MediaType, MessageId, UserId};

// ---------------------------------------------------------------------------
// Delivery state
// ---------------------------------------------------------------------------

/// Where a cached message stands relative to the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Written optimistically; no remote event seen yet.
    Pending,
    /// Last written from a remote event.
    Confirmed,
    /// The remote write was rejected. The row stays visible.
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown delivery state: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message as cached locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Backend document id, or the client-generated id of an optimistic send.
    pub id: MessageId,
    /// The chat this message belongs to.
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub text: String,
    /// Epoch millis.
    pub timestamp: i64,
    pub edited: bool,
    /// Hosted media URL. `None` while an upload is in flight.
    pub media_url: Option<String>,
    pub is_media: bool,
    pub media_type: Option<MediaType>,
    pub delivery: DeliveryState,
}

impl Message {
    /// A plain text message.
    pub fn text(
        id: MessageId,
        chat_id: ChatId,
        sender_id: UserId,
        text: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            chat_id,
            sender_id,
            text: text.into(),
            timestamp,
            edited: false,
            media_url: None,
            is_media: false,
            media_type: None,
            delivery: DeliveryState::Confirmed,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryState) -> Self {
        self.delivery = delivery;
        self
    }

    /// A media message still waiting for its upload.
    pub fn is_uploading(&self) -> bool {
        self.is_media && self.media_url.is_none()
    }
}
