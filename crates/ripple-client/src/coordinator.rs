//! Chat coordinator: one open chat between the signed-in user and a peer.
//!
//! Remote message events are merged into the local cache; user actions are
//! written optimistically to the cache and then to the backend under the
//! same message id, so the remote echo replaces the optimistic row.
//!
//! A coordinator goes `Uninitialized -> Listening -> Closed` exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ripple_remote::{public_id_from_url, DocumentStore, MediaUpload, Subscription};
use ripple_shared::clock::now_millis;
use ripple_shared::protocol::{ChatDoc, ChatUpdate, MessageDoc, NotificationRequest, PresenceDoc};
use ripple_shared::{ChatId, MediaType, MessageId, UserId};
use ripple_store::{DeliveryState, LiveQuery, Message, MessageCache};

use crate::error::{ChatError, Result};
use crate::events::{ChatEvent, EVENT_CAPACITY};
use crate::jobs::{auto_delete_key, Job, JobQueue};
use crate::state::ClientState;
use crate::sync_bridge::{MessageEvent, MessageFeed, RemoteSyncAdapter};
use crate::typing::TypingDebouncer;

/// Where a coordinator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Listening,
    Closed,
}

/// Per-chat state shared with the listener tasks.
struct OpenChat {
    chat_id: ChatId,
    peer_id: UserId,
    typing: TypingDebouncer,
    peer_online: AtomicBool,
}

enum Session {
    Uninitialized,
    Listening {
        chat: Arc<OpenChat>,
        listeners: Vec<JoinHandle<()>>,
    },
    Closed,
}

pub struct ChatCoordinator {
    services: ClientState,
    events: broadcast::Sender<ChatEvent>,
    session: Mutex<Session>,
}

impl ChatCoordinator {
    pub fn new(services: ClientState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            services,
            events,
            session: Mutex::new(Session::Uninitialized),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> SessionPhase {
        match *self.lock() {
            Session::Uninitialized => SessionPhase::Uninitialized,
            Session::Listening { .. } => SessionPhase::Listening,
            Session::Closed => SessionPhase::Closed,
        }
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        match &*self.lock() {
            Session::Listening { chat, .. } => Some(chat.chat_id.clone()),
            _ => None,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn open_chat(&self) -> Result<Arc<OpenChat>> {
        match &*self.lock() {
            Session::Listening { chat, .. } => Ok(chat.clone()),
            Session::Uninitialized => Err(ChatError::NotInitialized),
            Session::Closed => Err(ChatError::Closed),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the chat: start the local live query and the three remote
    /// listeners (messages, chat document, peer presence).
    pub async fn initialize(&self, chat_id: ChatId, peer_id: UserId) -> Result<LiveQuery> {
        match self.phase() {
            SessionPhase::Uninitialized => {}
            SessionPhase::Listening => return Err(ChatError::AlreadyInitialized),
            SessionPhase::Closed => return Err(ChatError::Closed),
        }

        let store = &self.services.store;
        let query = self.services.cache.live_query(&chat_id).await?;
        let feed = RemoteSyncAdapter::new(store.clone()).subscribe(&chat_id)?;
        let chat_doc = store.watch_chat(&chat_id)?;
        let presence = store.watch_presence(&peer_id)?;

        let chat = Arc::new(OpenChat {
            typing: TypingDebouncer::new(
                store.clone(),
                chat_id.clone(),
                self.services.session.user_id.clone(),
                self.services.config.typing_clear_delay,
            ),
            chat_id,
            peer_id,
            peer_online: AtomicBool::new(false),
        });

        let listeners = vec![
            tokio::spawn(merge_remote_messages(feed, self.services.cache.clone())),
            tokio::spawn(follow_chat_doc(
                chat_doc,
                chat.clone(),
                self.services.jobs.clone(),
                self.events.clone(),
            )),
            tokio::spawn(follow_peer_presence(
                presence,
                chat.clone(),
                self.events.clone(),
            )),
        ];

        let mut session = self.lock();
        if !matches!(*session, Session::Uninitialized) {
            for task in &listeners {
                task.abort();
            }
            return Err(ChatError::AlreadyInitialized);
        }
        info!(chat = %chat.chat_id, peer = %chat.peer_id, "chat opened");
        *session = Session::Listening { chat, listeners };
        Ok(query)
    }

    /// Remove every listener. Writes already in flight are left alone.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Session::Closed);
        let Session::Listening { chat, listeners } = previous else {
            return;
        };

        for task in &listeners {
            task.abort();
        }
        // Each handle resolves once its task, and the subscription it owns,
        // has been dropped.
        join_all(listeners).await;
        chat.typing.shutdown().await;

        let _ = self.events.send(ChatEvent::Closed);
        info!(chat = %chat.chat_id, "chat closed");
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Send a text message. The returned id is already in the cache; a
    /// rejected write leaves the row marked [`DeliveryState::Failed`].
    pub async fn send_text(&self, text: &str) -> Result<MessageId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let chat = self.open_chat()?;

        let id = MessageId::generate();
        let timestamp = now_millis();
        let sender = self.services.session.user_id.clone();

        let local = Message::text(id.clone(), chat.chat_id.clone(), sender.clone(), text, timestamp)
            .with_delivery(DeliveryState::Pending);
        self.services.cache.upsert(local).await?;

        let doc = MessageDoc {
            id: id.to_string(),
            sender_id: sender.to_string(),
            text: text.to_string(),
            timestamp: Some(timestamp),
            ..Default::default()
        };
        if let Err(e) = self.deliver(&chat, &id, doc, text).await {
            debug!(chat = %chat.chat_id, id = %id, error = %e, "text send failed");
        }
        Ok(id)
    }

    /// Upload a file and send it as a media message.
    ///
    /// No row is created if the upload cannot be authorized; the optimistic
    /// row is removed again if the upload itself fails.
    pub async fn send_media(&self, upload: MediaUpload) -> Result<MessageId> {
        let chat = self.open_chat()?;

        let auth = self.services.signer.authorize_upload().await.map_err(|e| {
            warn!(chat = %chat.chat_id, error = %e, "upload authorization failed");
            e
        })?;

        let id = MessageId::generate();
        let timestamp = now_millis();
        let sender = self.services.session.user_id.clone();
        let media_type = upload.media_type;

        let mut local = Message::text(id.clone(), chat.chat_id.clone(), sender.clone(), "", timestamp)
            .with_delivery(DeliveryState::Pending);
        local.is_media = true;
        local.media_type = Some(media_type);
        self.services.cache.upsert(local.clone()).await?;

        let uploaded = match self.services.uploader.upload(&auth, upload).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                warn!(chat = %chat.chat_id, id = %id, error = %e, "media upload failed");
                if let Err(e) = self.services.cache.delete(&id).await {
                    warn!(id = %id, error = %e, "failed to drop optimistic media row");
                }
                return Err(e.into());
            }
        };

        local.media_url = Some(uploaded.secure_url.clone());
        self.services.cache.upsert(local).await?;

        let doc = MessageDoc {
            id: id.to_string(),
            sender_id: sender.to_string(),
            text: String::new(),
            timestamp: Some(timestamp),
            edited: false,
            media_url: Some(uploaded.secure_url),
            is_media: true,
            media_type: Some(media_type.as_str().to_string()),
        };
        self.deliver(&chat, &id, doc, media_preview(media_type)).await?;
        Ok(id)
    }

    /// Write a message document, then the chat preview, then poke the peer.
    async fn deliver(&self, chat: &OpenChat, id: &MessageId, doc: MessageDoc, preview: &str) -> Result<()> {
        let timestamp = doc.timestamp.unwrap_or_else(now_millis);
        let store = &self.services.store;

        if let Err(e) = store.set_message(&chat.chat_id, doc).await {
            warn!(chat = %chat.chat_id, id = %id, error = %e, "message write rejected");
            if let Err(e) = self.services.cache.mark_failed(id).await {
                warn!(id = %id, error = %e, "failed to mark message as failed");
            }
            let _ = self.events.send(ChatEvent::SendFailed {
                message_id: id.clone(),
                reason: e.to_string(),
            });
            return Err(e.into());
        }

        let preview_update = ChatUpdate::LastMessage {
            text: preview.to_string(),
            timestamp,
        };
        if let Err(e) = store.update_chat(&chat.chat_id, preview_update).await {
            warn!(chat = %chat.chat_id, error = %e, "failed to update chat preview");
        }

        if chat.typing.is_typing() {
            if let Err(e) = chat.typing.set(false).await {
                debug!(chat = %chat.chat_id, error = %e, "failed to clear typing flag after send");
            }
        }

        self.notify_peer(chat, preview).await;
        Ok(())
    }

    async fn notify_peer(&self, chat: &OpenChat, text: &str) {
        if chat.peer_online.load(Ordering::SeqCst) {
            debug!(peer = %chat.peer_id, "peer online, no push");
            return;
        }
        let request = NotificationRequest {
            recipient_id: chat.peer_id.to_string(),
            sender_id: self.services.session.user_id.to_string(),
            title: self.services.session.display_name.clone(),
            message_text: text.to_string(),
            chat_id: chat.chat_id.to_string(),
        };
        if let Err(e) = self.services.notifier.notify(&request).await {
            warn!(peer = %chat.peer_id, error = %e, "push trigger failed");
        }
    }

    /// Change a message's text. The cache follows once the backend echoes
    /// the modification.
    pub async fn edit_text(&self, id: &MessageId, new_text: &str) -> Result<()> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let chat = self.open_chat()?;
        self.services
            .store
            .edit_message(&chat.chat_id, id, new_text)
            .await?;
        debug!(chat = %chat.chat_id, id = %id, "message edited");
        Ok(())
    }

    /// Delete a message remotely and locally, and its hosted media if any.
    pub async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let chat = self.open_chat()?;
        let cached = self.services.cache.get(id).await?;

        self.services.store.delete_message(&chat.chat_id, id).await?;
        self.services.cache.delete(id).await?;
        info!(chat = %chat.chat_id, id = %id, "message deleted");

        let public_id = cached
            .and_then(|m| m.media_url)
            .and_then(|url| public_id_from_url(&url));
        if let Some(public_id) = public_id {
            if let Err(e) = self.services.deleter.delete_media(&public_id).await {
                warn!(public_id = %public_id, error = %e, "media delete failed");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    pub async fn set_typing(&self, typing: bool) -> Result<()> {
        self.open_chat()?.typing.set(typing).await
    }

    /// Raise the typing flag; it clears itself after a quiet period.
    pub async fn keystroke(&self) -> Result<()> {
        self.open_chat()?.typing.keystroke().await
    }

    // ------------------------------------------------------------------
    // Auto-delete
    // ------------------------------------------------------------------

    /// Switch auto-delete on with the given retention, or off with `None`.
    /// Returns when the purge is due, as epoch millis.
    pub async fn schedule_auto_delete(&self, after: Option<Duration>) -> Result<Option<i64>> {
        let chat = self.open_chat()?;
        let store = &self.services.store;

        let Some(after) = after.filter(|d| !d.is_zero()) else {
            store
                .update_chat(
                    &chat.chat_id,
                    ChatUpdate::AutoDelete {
                        after_millis: None,
                        start_time: None,
                    },
                )
                .await?;
            info!(chat = %chat.chat_id, "auto-delete off");
            return Ok(None);
        };

        let after_millis = i64::try_from(after.as_millis()).unwrap_or(i64::MAX);
        // Only delivered messages count, so the anchor comes from the chat doc.
        let start = store
            .get_chat(&chat.chat_id)
            .await?
            .and_then(|doc| doc.last_timestamp)
            .unwrap_or_else(now_millis);

        store
            .update_chat(
                &chat.chat_id,
                ChatUpdate::AutoDelete {
                    after_millis: Some(after_millis),
                    start_time: Some(start),
                },
            )
            .await?;

        let due_at = store
            .get_chat(&chat.chat_id)
            .await?
            .and_then(|doc| doc.purge_due_at())
            .unwrap_or_else(|| start.saturating_add(after_millis));

        info!(chat = %chat.chat_id, after_ms = after_millis, due_at, "auto-delete on");
        Ok(Some(due_at))
    }
}

fn media_preview(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Image => "Photo",
        MediaType::Video => "Video",
        MediaType::File => "File",
    }
}

async fn hand_off_purge(jobs: &dyn JobQueue, chat_id: &ChatId, due_at: i64) -> Result<()> {
    let delay = Duration::from_millis(due_at.saturating_sub(now_millis()).max(0) as u64);
    jobs.schedule(
        &auto_delete_key(chat_id),
        delay,
        due_at,
        Job::PurgeChat(chat_id.clone()),
    )
    .await
}

// ----------------------------------------------------------------------
// Listener tasks
// ----------------------------------------------------------------------

async fn merge_remote_messages(mut feed: MessageFeed, cache: MessageCache) {
    while let Some(event) = feed.next().await {
        let result = match &event {
            MessageEvent::Added(message) | MessageEvent::Modified(message) => {
                cache.upsert(message.clone()).await
            }
            MessageEvent::Removed(id) => cache.delete(id).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!(chat = %feed.chat_id(), id = %event.message_id(), error = %e, "failed to apply remote change");
        }
    }
    debug!(chat = %feed.chat_id(), "message feed ended");
}

async fn follow_chat_doc(
    mut sub: Subscription<Option<ChatDoc>>,
    chat: Arc<OpenChat>,
    jobs: Arc<dyn JobQueue>,
    events: broadcast::Sender<ChatEvent>,
) {
    let mut peer_typing = false;
    let mut auto_delete: Option<(Option<Duration>, Option<i64>)> = None;

    while let Some(item) = sub.next().await {
        let doc = match item {
            Ok(doc) => doc.unwrap_or_default(),
            Err(e) => {
                warn!(chat = %chat.chat_id, error = %e, "chat listener failed");
                break;
            }
        };

        let typing = doc.is_typing(&chat.peer_id);
        if typing != peer_typing {
            peer_typing = typing;
            let _ = events.send(ChatEvent::PeerTyping(typing));
        }

        let current = (doc.auto_delete_after(), doc.purge_due_at());
        if auto_delete == Some(current) {
            continue;
        }
        let previous_due = auto_delete.and_then(|(_, due)| due);
        auto_delete = Some(current);
        let _ = events.send(ChatEvent::AutoDeleteChanged {
            after: current.0,
            due_at: current.1,
        });

        // Job commands are issued here only, in snapshot order. A newer
        // message moves the due time and lands here as well.
        match (previous_due, current.1) {
            (_, Some(due_at)) => match hand_off_purge(jobs.as_ref(), &chat.chat_id, due_at).await {
                Ok(()) => debug!(chat = %chat.chat_id, due_at, "purge scheduled"),
                Err(e) => warn!(chat = %chat.chat_id, error = %e, "failed to schedule purge"),
            },
            (Some(_), None) => match jobs.cancel(&auto_delete_key(&chat.chat_id)).await {
                Ok(()) => debug!(chat = %chat.chat_id, "purge cancelled"),
                Err(e) => warn!(chat = %chat.chat_id, error = %e, "failed to cancel purge"),
            },
            (None, None) => {}
        }
    }
}

async fn follow_peer_presence(
    mut sub: Subscription<Option<PresenceDoc>>,
    chat: Arc<OpenChat>,
    events: broadcast::Sender<ChatEvent>,
) {
    while let Some(item) = sub.next().await {
        match item {
            Ok(presence) => {
                let online = presence.map(|p| p.online).unwrap_or(false);
                chat.peer_online.store(online, Ordering::SeqCst);
                let _ = events.send(ChatEvent::PeerPresence(presence));
            }
            Err(e) => {
                warn!(peer = %chat.peer_id, error = %e, "presence listener failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobCommand, JobHandoff};
    use crate::session::SessionContext;
    use crate::testing::{settle, test_client, RecordingMedia, RecordingNotifier};
    use ripple_remote::{MemoryBackend, Operation};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        backend: Arc<MemoryBackend>,
        media: Arc<RecordingMedia>,
        notifier: Arc<RecordingNotifier>,
        jobs: mpsc::Receiver<JobCommand>,
        coordinator: ChatCoordinator,
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn chat() -> ChatId {
        ChatId::for_participants(&alice(), &bob())
    }

    fn harness() -> Harness {
        let client = test_client();
        Harness {
            backend: client.backend,
            media: client.media,
            notifier: client.notifier,
            jobs: client.jobs,
            coordinator: ChatCoordinator::new(client.state),
        }
    }

    async fn open(h: &Harness) -> LiveQuery {
        let query = h.coordinator.initialize(chat(), bob()).await.unwrap();
        settle().await;
        query
    }

    async fn wait_for(query: &mut LiveQuery, pred: impl Fn(&[Message]) -> bool) -> Vec<Message> {
        timeout(WAIT, async {
            loop {
                let rows = query.current();
                if pred(rows.as_slice()) {
                    return rows;
                }
                query.changed().await.unwrap();
            }
        })
        .await
        .expect("live query never matched")
    }

    async fn next_job(h: &mut Harness) -> JobCommand {
        timeout(WAIT, h.jobs.recv())
            .await
            .expect("no job command")
            .expect("job channel closed")
    }

    fn bob_says(id: &str, text: &str, ts: i64) -> MessageDoc {
        MessageDoc {
            id: id.into(),
            sender_id: "bob".into(),
            text: text.into(),
            timestamp: Some(ts),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn operations_need_an_open_chat() {
        let h = harness();
        assert!(matches!(
            h.coordinator.send_text("hi").await,
            Err(ChatError::NotInitialized)
        ));
        assert_eq!(h.coordinator.phase(), SessionPhase::Uninitialized);

        open(&h).await;
        assert_eq!(h.coordinator.phase(), SessionPhase::Listening);
        assert!(matches!(
            h.coordinator.initialize(chat(), bob()).await,
            Err(ChatError::AlreadyInitialized)
        ));

        h.coordinator.close().await;
        assert_eq!(h.coordinator.phase(), SessionPhase::Closed);
        assert!(matches!(
            h.coordinator.set_typing(true).await,
            Err(ChatError::Closed)
        ));
        assert!(matches!(
            h.coordinator.initialize(chat(), bob()).await,
            Err(ChatError::Closed)
        ));
    }

    #[tokio::test]
    async fn optimistic_send_and_remote_echo_leave_one_row() {
        let h = harness();
        let mut query = open(&h).await;

        let id = h.coordinator.send_text("  hello  ").await.unwrap();

        let rows = wait_for(&mut query, |rows| {
            rows.iter().any(|m| m.delivery == DeliveryState::Confirmed)
        })
        .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].text, "hello");

        let remote = h.backend.raw_message(&chat(), id.as_str()).unwrap();
        assert_eq!(remote["senderId"], "alice");

        let doc = h.backend.get_chat(&chat()).await.unwrap().unwrap();
        assert_eq!(doc.last_message.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let h = harness();
        open(&h).await;
        assert!(matches!(
            h.coordinator.send_text("   ").await,
            Err(ChatError::EmptyMessage)
        ));
        assert!(h.backend.list_messages(&chat()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_send_stays_visible_as_failed() {
        let h = harness();
        let mut events = h.coordinator.subscribe_events();
        let mut query = open(&h).await;
        h.backend.fail_next(Operation::SetMessage, 1);

        let id = h.coordinator.send_text("lost").await.unwrap();

        let rows = wait_for(&mut query, |rows| {
            rows.iter().any(|m| m.delivery == DeliveryState::Failed)
        })
        .await;
        assert_eq!(rows.len(), 1);
        assert!(h.notifier.sent().is_empty());

        let failed = timeout(WAIT, async {
            loop {
                if let Ok(ChatEvent::SendFailed { message_id, .. }) = events.recv().await {
                    return message_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(failed, id);
    }

    #[tokio::test]
    async fn remote_changes_reach_the_cache() {
        let h = harness();
        h.backend
            .set_message(&chat(), bob_says("b1", "first", 100))
            .await
            .unwrap();
        let mut query = open(&h).await;
        wait_for(&mut query, |rows| rows.len() == 1).await;

        h.backend
            .set_message(&chat(), bob_says("b0", "earlier", 50))
            .await
            .unwrap();
        let rows = wait_for(&mut query, |rows| rows.len() == 2).await;
        let texts: Vec<_> = rows.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["earlier", "first"]);

        h.backend
            .delete_message(&chat(), &MessageId::from("b1"))
            .await
            .unwrap();
        let rows = wait_for(&mut query, |rows| rows.len() == 1).await;
        assert_eq!(rows[0].id, MessageId::from("b0"));
    }

    #[tokio::test]
    async fn edit_is_reflected_through_the_listener() {
        let h = harness();
        let mut query = open(&h).await;
        let id = h.coordinator.send_text("helo").await.unwrap();
        wait_for(&mut query, |rows| {
            rows.iter().any(|m| m.delivery == DeliveryState::Confirmed)
        })
        .await;

        h.coordinator.edit_text(&id, "hello").await.unwrap();
        let rows = wait_for(&mut query, |rows| rows.iter().any(|m| m.edited)).await;
        assert_eq!(rows[0].text, "hello");

        assert!(matches!(
            h.coordinator.edit_text(&id, " ").await,
            Err(ChatError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn delete_removes_local_remote_and_media() {
        let h = harness();
        let mut query = open(&h).await;

        let id = h
            .coordinator
            .send_media(MediaUpload::from_file("pic.jpg", vec![1u8, 2, 3]))
            .await
            .unwrap();
        let rows = wait_for(&mut query, |rows| {
            rows.iter()
                .any(|m| m.delivery == DeliveryState::Confirmed && m.media_url.is_some())
        })
        .await;
        assert_eq!(rows[0].media_type, Some(MediaType::Image));
        assert_eq!(h.media.uploads(), vec!["pic.jpg".to_string()]);

        h.coordinator.delete_message(&id).await.unwrap();
        let rows = wait_for(&mut query, |rows| rows.is_empty()).await;
        assert!(rows.is_empty());
        assert!(h.backend.raw_message(&chat(), id.as_str()).is_none());
        assert_eq!(h.media.deleted(), vec!["chat/pic".to_string()]);
    }

    #[tokio::test]
    async fn unauthorized_upload_creates_nothing() {
        let h = harness();
        open(&h).await;
        h.media.fail_authorize();

        let result = h
            .coordinator
            .send_media(MediaUpload::from_file("pic.jpg", vec![1u8]))
            .await;
        assert!(matches!(result, Err(ChatError::Remote(_))));
        assert!(h
            .coordinator
            .services
            .cache
            .messages_for_chat(&chat())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failed_upload_removes_optimistic_row() {
        let h = harness();
        open(&h).await;
        h.media.fail_upload();

        let result = h
            .coordinator
            .send_media(MediaUpload::from_file("clip.mp4", vec![1u8]))
            .await;
        assert!(result.is_err());
        assert!(h
            .coordinator
            .services
            .cache
            .messages_for_chat(&chat())
            .await
            .unwrap()
            .is_empty());
        assert!(h.backend.list_messages(&chat()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_only_when_peer_offline() {
        let h = harness();
        open(&h).await;

        h.coordinator.send_text("are you there?").await.unwrap();
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient_id, "bob");
        assert_eq!(sent[0].title, "Alice");
        assert_eq!(sent[0].chat_id, chat().to_string());

        h.backend
            .set_presence(
                &bob(),
                PresenceDoc {
                    online: true,
                    last_seen: now_millis(),
                },
            )
            .await
            .unwrap();
        settle().await;

        h.coordinator.send_text("oh hi").await.unwrap();
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn push_failure_does_not_fail_the_send() {
        let h = harness();
        let mut query = open(&h).await;
        h.notifier.fail();

        h.coordinator.send_text("hi").await.unwrap();
        wait_for(&mut query, |rows| {
            rows.iter().any(|m| m.delivery == DeliveryState::Confirmed)
        })
        .await;
    }

    #[tokio::test]
    async fn peer_typing_is_broadcast() {
        let h = harness();
        let mut events = h.coordinator.subscribe_events();
        open(&h).await;

        h.backend
            .update_chat(
                &chat(),
                ChatUpdate::Typing {
                    user: bob(),
                    typing: true,
                },
            )
            .await
            .unwrap();

        let typing = timeout(WAIT, async {
            loop {
                if let Ok(ChatEvent::PeerTyping(t)) = events.recv().await {
                    return t;
                }
            }
        })
        .await
        .unwrap();
        assert!(typing);
    }

    #[tokio::test]
    async fn own_typing_flag_is_written() {
        let h = harness();
        open(&h).await;

        h.coordinator.keystroke().await.unwrap();
        let doc = h.backend.get_chat(&chat()).await.unwrap().unwrap();
        assert!(doc.is_typing(&alice()));

        h.coordinator.set_typing(false).await.unwrap();
        let doc = h.backend.get_chat(&chat()).await.unwrap().unwrap();
        assert!(!doc.is_typing(&alice()));
    }

    #[tokio::test]
    async fn auto_delete_fires_retention_after_last_message() {
        let mut h = harness();
        let t = now_millis() - 10_000;
        h.backend
            .set_message(&chat(), bob_says("b1", "old news", t))
            .await
            .unwrap();
        h.backend
            .update_chat(
                &chat(),
                ChatUpdate::LastMessage {
                    text: "old news".into(),
                    timestamp: t,
                },
            )
            .await
            .unwrap();
        let mut query = open(&h).await;
        wait_for(&mut query, |rows| rows.len() == 1).await;

        let d = Duration::from_secs(3600);
        let due = h.coordinator.schedule_auto_delete(Some(d)).await.unwrap();
        assert_eq!(due, Some(t + 3_600_000));

        match next_job(&mut h).await {
            JobCommand::Schedule {
                key,
                delay,
                due_at,
                job,
            } => {
                assert_eq!(key, "auto_delete_alice-bob");
                assert_eq!(due_at, t + 3_600_000);
                assert_eq!(job, Job::PurgeChat(chat()));
                assert!(delay <= Duration::from_millis(3_590_000));
                assert!(delay > Duration::from_millis(3_500_000));
            }
            other => panic!("expected schedule, got {other:?}"),
        }

        let doc = h.backend.get_chat(&chat()).await.unwrap().unwrap();
        assert_eq!(doc.auto_delete_after_millis, Some(3_600_000));
        assert_eq!(doc.auto_delete_start_time, Some(t));

        assert_eq!(h.coordinator.schedule_auto_delete(None).await.unwrap(), None);
        assert_eq!(
            next_job(&mut h).await,
            JobCommand::Cancel {
                key: "auto_delete_alice-bob".into()
            }
        );
        let doc = h.backend.get_chat(&chat()).await.unwrap().unwrap();
        assert_eq!(doc.auto_delete_after_millis, None);
    }

    #[tokio::test]
    async fn auto_delete_on_empty_chat_starts_now() {
        let mut h = harness();
        open(&h).await;

        let before = now_millis();
        let due = h
            .coordinator
            .schedule_auto_delete(Some(Duration::from_secs(60)))
            .await
            .unwrap()
            .unwrap();
        assert!(due >= before + 60_000);
        assert!(matches!(next_job(&mut h).await, JobCommand::Schedule { .. }));
    }

    #[tokio::test]
    async fn newer_message_reschedules_purge() {
        let mut h = harness();
        open(&h).await;

        let first = h
            .coordinator
            .schedule_auto_delete(Some(Duration::from_secs(60)))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(next_job(&mut h).await, JobCommand::Schedule { .. }));

        tokio::time::sleep(Duration::from_millis(5)).await;
        h.coordinator.send_text("keep this a minute").await.unwrap();

        match next_job(&mut h).await {
            JobCommand::Schedule { key, due_at, .. } => {
                assert_eq!(key, auto_delete_key(&chat()));
                assert!(due_at > first);
            }
            other => panic!("expected reschedule, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn switching_off_after_new_message_leaves_purge_cancelled() {
        let mut h = harness();
        open(&h).await;

        h.coordinator
            .schedule_auto_delete(Some(Duration::from_secs(60)))
            .await
            .unwrap();
        h.coordinator.send_text("bye").await.unwrap();
        h.coordinator.schedule_auto_delete(None).await.unwrap();

        loop {
            match next_job(&mut h).await {
                JobCommand::Cancel { key } => {
                    assert_eq!(key, auto_delete_key(&chat()));
                    break;
                }
                JobCommand::Schedule { .. } => {}
            }
        }
        settle().await;
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_send_does_not_move_auto_delete_anchor() {
        let mut h = harness();
        let t = now_millis() - 10_000;
        h.backend
            .update_chat(
                &chat(),
                ChatUpdate::LastMessage {
                    text: "old news".into(),
                    timestamp: t,
                },
            )
            .await
            .unwrap();
        let mut query = open(&h).await;

        h.backend.fail_next(Operation::SetMessage, 1);
        h.coordinator.send_text("lost").await.unwrap();
        wait_for(&mut query, |rows| {
            rows.iter().any(|m| m.delivery == DeliveryState::Failed)
        })
        .await;

        let due = h
            .coordinator
            .schedule_auto_delete(Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(due, Some(t + 3_600_000));
        match next_job(&mut h).await {
            JobCommand::Schedule { due_at, .. } => assert_eq!(due_at, t + 3_600_000),
            other => panic!("expected schedule, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn each_participant_schedules_on_own_queue() {
        let client = test_client();
        let mut alice_jobs = client.jobs;
        let (bob_queue, mut bob_jobs) = JobHandoff::channel(16);
        let bob_state = ClientState {
            session: SessionContext::new(bob(), "Bob"),
            cache: MessageCache::in_memory().unwrap(),
            jobs: Arc::new(bob_queue),
            ..client.state.clone()
        };
        let alice_side = ChatCoordinator::new(client.state);
        let bob_side = ChatCoordinator::new(bob_state);
        alice_side.initialize(chat(), bob()).await.unwrap();
        bob_side.initialize(chat(), alice()).await.unwrap();
        settle().await;

        let due = alice_side
            .schedule_auto_delete(Some(Duration::from_secs(60)))
            .await
            .unwrap();
        for rx in [&mut alice_jobs, &mut bob_jobs] {
            match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
                JobCommand::Schedule { due_at, .. } => assert_eq!(Some(due_at), due),
                other => panic!("expected schedule, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn close_removes_every_listener() {
        let h = harness();
        open(&h).await;
        assert_eq!(h.backend.message_listener_count(&chat()), 1);
        assert_eq!(h.backend.chat_listener_count(&chat()), 1);
        assert_eq!(h.backend.presence_listener_count(&bob()), 1);

        h.coordinator.keystroke().await.unwrap();
        h.coordinator.close().await;

        assert_eq!(h.backend.message_listener_count(&chat()), 0);
        assert_eq!(h.backend.chat_listener_count(&chat()), 0);
        assert_eq!(h.backend.presence_listener_count(&bob()), 0);

        let doc = h.backend.get_chat(&chat()).await.unwrap().unwrap();
        assert!(!doc.is_typing(&alice()));
    }
}
