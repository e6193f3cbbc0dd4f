//! Remote sync adapter: turns a chat's realtime document changes into typed
//! message events.
//!
//! The adapter keeps nothing but the subscription. A listener error is
//! logged and ends the feed; there is no retry until the chat is opened
//! again.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use ripple_remote::{ChangeKind, DocumentChange, DocumentStore, Subscription};
use ripple_shared::clock::now_millis;
use ripple_shared::protocol::{decode_document, MessageDoc};
use ripple_shared::{ChatId, MediaType, MessageId, UserId};
use ripple_store::{DeliveryState, Message};

use crate::error::Result;

/// One changed remote message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Added(Message),
    Modified(Message),
    Removed(MessageId),
}

impl MessageEvent {
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Added(m) | Self::Modified(m) => &m.id,
            Self::Removed(id) => id,
        }
    }
}

#[derive(Clone)]
pub struct RemoteSyncAdapter {
    store: Arc<dyn DocumentStore>,
}

impl RemoteSyncAdapter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Start listening to a chat's messages.
    pub fn subscribe(&self, chat_id: &ChatId) -> Result<MessageFeed> {
        let subscription = self.store.watch_messages(chat_id)?;
        debug!(chat = %chat_id, "message feed opened");
        Ok(MessageFeed {
            chat_id: chat_id.clone(),
            subscription,
            pending: VecDeque::new(),
        })
    }
}

/// Live stream of [`MessageEvent`]s for one chat, in backend order.
#[derive(Debug)]
pub struct MessageFeed {
    chat_id: ChatId,
    subscription: Subscription<Vec<DocumentChange>>,
    pending: VecDeque<MessageEvent>,
}

impl MessageFeed {
    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Next event, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<MessageEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            match self.subscription.next().await? {
                Ok(batch) => {
                    self.pending.extend(
                        batch
                            .into_iter()
                            .filter_map(|change| decode_change(&self.chat_id, change)),
                    );
                }
                Err(e) => {
                    warn!(chat = %self.chat_id, error = %e, "message listener failed");
                    self.subscription.close();
                    return None;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.pending.clear();
        self.subscription.close();
    }
}

/// Decode one document change. Undecodable documents are skipped.
pub fn decode_change(chat_id: &ChatId, change: DocumentChange) -> Option<MessageEvent> {
    if change.kind == ChangeKind::Removed {
        return Some(MessageEvent::Removed(MessageId(change.doc_id)));
    }

    let doc = match decode_document::<MessageDoc>(change.data) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(chat = %chat_id, id = %change.doc_id, error = %e, "skipping undecodable message");
            return None;
        }
    };

    let message = message_from_doc(chat_id, change.doc_id, doc);
    Some(match change.kind {
        ChangeKind::Added => MessageEvent::Added(message),
        _ => MessageEvent::Modified(message),
    })
}

/// Build a cache row from a remote document. The document id wins over the
/// `id` field.
pub fn message_from_doc(chat_id: &ChatId, doc_id: String, doc: MessageDoc) -> Message {
    let media_type = doc.media_type.as_deref().and_then(|t| match t.parse::<MediaType>() {
        Ok(t) => Some(t),
        Err(e) => {
            debug!(id = %doc_id, error = %e, "ignoring media type");
            None
        }
    });

    Message {
        id: MessageId(doc_id),
        chat_id: chat_id.clone(),
        sender_id: UserId(doc.sender_id),
        text: doc.text,
        timestamp: doc.timestamp.unwrap_or_else(now_millis),
        edited: doc.edited,
        media_url: doc.media_url,
        is_media: doc.is_media,
        media_type,
        delivery: DeliveryState::Confirmed,
    }
}
