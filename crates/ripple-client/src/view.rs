//! Observable state for a chat screen.
//!
//! [`ChatView`] turns a coordinator's live query and events into `watch`
//! channels a renderer can poll or await, and forwards user intents back to
//! the coordinator. Failed intents end up in [`ChatView::error`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ripple_remote::MediaUpload;
use ripple_shared::protocol::PresenceDoc;
use ripple_shared::{ChatId, MessageId, UserId};
use ripple_store::Message;

use crate::coordinator::ChatCoordinator;
use crate::error::Result;
use crate::events::ChatEvent;

/// What the screen shows about the other participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStatus {
    pub typing: bool,
    pub presence: Option<PresenceDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoDeleteState {
    pub after: Option<Duration>,
    /// Epoch millis.
    pub due_at: Option<i64>,
}

pub struct ChatView {
    coordinator: Arc<ChatCoordinator>,
    messages: watch::Receiver<Vec<Message>>,
    peer: watch::Receiver<PeerStatus>,
    auto_delete: watch::Receiver<AutoDeleteState>,
    error: Arc<watch::Sender<Option<String>>>,
    forwarder: JoinHandle<()>,
}

impl ChatView {
    /// Open `chat_id` with `peer_id` on `coordinator` and start mirroring it.
    pub async fn open(coordinator: Arc<ChatCoordinator>, chat_id: ChatId, peer_id: UserId) -> Result<Self> {
        // Subscribe first so the initial peer state is not missed.
        let events = coordinator.subscribe_events();
        let query = coordinator.initialize(chat_id, peer_id).await?;

        let (peer_tx, peer) = watch::channel(PeerStatus::default());
        let (auto_tx, auto_delete) = watch::channel(AutoDeleteState::default());
        let error = Arc::new(watch::channel::<Option<String>>(None).0);

        let forwarder = tokio::spawn(forward_events(events, peer_tx, auto_tx, error.clone()));

        Ok(Self {
            coordinator,
            messages: query.into_receiver(),
            peer,
            auto_delete,
            error,
            forwarder,
        })
    }

    /// Messages of the chat, oldest first.
    pub fn messages(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.clone()
    }

    pub fn peer_status(&self) -> watch::Receiver<PeerStatus> {
        self.peer.clone()
    }

    pub fn auto_delete(&self) -> watch::Receiver<AutoDeleteState> {
        self.auto_delete.clone()
    }

    /// Last user-visible error, until dismissed.
    pub fn error(&self) -> watch::Receiver<Option<String>> {
        self.error.subscribe()
    }

    pub fn dismiss_error(&self) {
        self.error.send_replace(None);
    }

    fn surface<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.error.send_replace(Some(e.to_string()));
        }
        result
    }

    // ------------------------------------------------------------------
    // Intents
    // ------------------------------------------------------------------

    pub async fn send(&self, text: &str) -> Result<MessageId> {
        let result = self.coordinator.send_text(text).await;
        self.surface(result)
    }

    pub async fn send_media(&self, upload: MediaUpload) -> Result<MessageId> {
        let result = self.coordinator.send_media(upload).await;
        self.surface(result)
    }

    pub async fn edit(&self, id: &MessageId, text: &str) -> Result<()> {
        let result = self.coordinator.edit_text(id, text).await;
        self.surface(result)
    }

    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        let result = self.coordinator.delete_message(id).await;
        self.surface(result)
    }

    /// The input field changed. An empty field takes the typing flag down.
    pub async fn on_text_changed(&self, text: &str) {
        let result = if text.trim().is_empty() {
            self.coordinator.set_typing(false).await
        } else {
            self.coordinator.keystroke().await
        };
        if let Err(e) = result {
            debug!(error = %e, "typing update failed");
        }
    }

    /// `None` switches auto-delete off.
    pub async fn set_auto_delete(&self, after: Option<Duration>) -> Result<Option<i64>> {
        let result = self.coordinator.schedule_auto_delete(after).await;
        self.surface(result)
    }

    /// Leave the chat screen. The view keeps its last state.
    pub async fn leave(&self) {
        self.coordinator.close().await;
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

async fn forward_events(
    mut events: broadcast::Receiver<ChatEvent>,
    peer: watch::Sender<PeerStatus>,
    auto_delete: watch::Sender<AutoDeleteState>,
    error: Arc<watch::Sender<Option<String>>>,
) {
    loop {
        match events.recv().await {
            Ok(ChatEvent::PeerTyping(typing)) => {
                peer.send_modify(|status| status.typing = typing);
            }
            Ok(ChatEvent::PeerPresence(presence)) => {
                peer.send_modify(|status| status.presence = presence);
            }
            Ok(ChatEvent::AutoDeleteChanged { after, due_at }) => {
                auto_delete.send_replace(AutoDeleteState { after, due_at });
            }
            Ok(ChatEvent::SendFailed { message_id, reason }) => {
                error.send_replace(Some(format!("Message not sent: {reason}")));
                debug!(id = %message_id, "send failure surfaced");
            }
            Ok(ChatEvent::Closed) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "chat view fell behind on events");
            }
        }
    }
}
