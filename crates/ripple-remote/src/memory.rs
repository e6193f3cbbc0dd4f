//! In-process [`DocumentStore`] with realtime fan-out.
//!
//! Mirrors the observable behaviour of the managed backend closely enough to
//! drive the client end to end: snapshot-then-diff listeners, merge writes on
//! chat documents, and injectable failures. Used by tests and local
//! development.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use ripple_shared::protocol::{
    decode_document, ChatDoc, ChatUpdate, ContactDoc, MessageDoc, PresenceDoc, UserProfile,
};
use ripple_shared::{ChatId, MessageId, UserId};

use crate::backend::{ChangeKind, DocumentChange, DocumentStore};
use crate::error::{RemoteError, Result};
use crate::subscription::{Emitter, Subscription};

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SetMessage,
    EditMessage,
    DeleteMessage,
    ListMessages,
    UpdateChat,
    SetPresence,
    AddContact,
}

#[derive(Default)]
struct State {
    messages: HashMap<ChatId, BTreeMap<String, Value>>,
    chats: HashMap<ChatId, ChatDoc>,
    presence: HashMap<UserId, PresenceDoc>,
    users: BTreeMap<String, UserProfile>,
    contacts: HashMap<UserId, BTreeMap<UserId, ContactDoc>>,

    message_listeners: HashMap<ChatId, Vec<Emitter<Vec<DocumentChange>>>>,
    chat_listeners: HashMap<ChatId, Vec<Emitter<Option<ChatDoc>>>>,
    presence_listeners: HashMap<UserId, Vec<Emitter<Option<PresenceDoc>>>>,
    contact_listeners: HashMap<UserId, Vec<Emitter<BTreeSet<UserId>>>>,

    failures: HashMap<Operation, usize>,
    /// Reply delay after a write has landed.
    latency: HashMap<Operation, Duration>,
}

impl State {
    fn check(&mut self, op: Operation) -> Result<()> {
        if let Some(remaining) = self.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Unavailable(format!("{op:?} failed (injected)")));
            }
        }
        Ok(())
    }

    fn sorted_messages(&self, chat_id: &ChatId) -> Vec<(String, Value)> {
        let mut docs: Vec<(String, Value)> = self
            .messages
            .get(chat_id)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        docs.sort_by(|(a_id, a), (b_id, b)| {
            timestamp_of(a)
                .cmp(&timestamp_of(b))
                .then_with(|| a_id.cmp(b_id))
        });
        docs
    }

    fn contact_ids(&self, owner: &UserId) -> BTreeSet<UserId> {
        self.contacts
            .get(owner)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Hold back a reply the way a slow network would.
async fn reply_after(latency: Option<Duration>) {
    if let Some(delay) = latency {
        tokio::time::sleep(delay).await;
    }
}

fn timestamp_of(doc: &Value) -> i64 {
    doc.get("timestamp").and_then(Value::as_i64).unwrap_or(0)
}

/// Send to every live listener, forgetting the ones that went away.
fn emit<T: Clone>(listeners: Option<&mut Vec<Emitter<T>>>, value: T) {
    if let Some(listeners) = listeners {
        listeners.retain(|tx| tx.send(Ok(value.clone())).is_ok());
    }
}

fn prune<K: std::hash::Hash + Eq, T>(map: &mut HashMap<K, Vec<Emitter<T>>>, key: &K) {
    if let Some(listeners) = map.get_mut(key) {
        listeners.retain(|tx| !tx.is_closed());
    }
}

/// Shared in-memory backend. Clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every mutation completes before the guard drops; a poisoned lock
        // still holds consistent data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn weak(&self) -> Weak<Mutex<State>> {
        Arc::downgrade(&self.state)
    }

    /// Make the next `times` calls of `op` fail with [`RemoteError::Unavailable`].
    pub fn fail_next(&self, op: Operation, times: usize) {
        self.lock().failures.insert(op, times);
    }

    /// Delay every reply of `op` by `delay`. The write itself lands, and is
    /// visible to listeners, before the delay starts.
    pub fn slow_replies(&self, op: Operation, delay: Duration) {
        self.lock().latency.insert(op, delay);
    }

    /// Deliver a listener error to every message listener of the chat and
    /// terminate them, the way a revoked permission would.
    pub fn break_message_listeners(&self, chat_id: &ChatId, reason: &str) {
        let mut state = self.lock();
        if let Some(listeners) = state.message_listeners.remove(chat_id) {
            for tx in listeners {
                let _ = tx.send(Err(RemoteError::Rejected(reason.to_string())));
            }
        }
    }

    /// Number of open message listeners on a chat.
    pub fn message_listener_count(&self, chat_id: &ChatId) -> usize {
        self.lock()
            .message_listeners
            .get(chat_id)
            .map(|l| l.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn chat_listener_count(&self, chat_id: &ChatId) -> usize {
        self.lock()
            .chat_listeners
            .get(chat_id)
            .map(|l| l.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn presence_listener_count(&self, user: &UserId) -> usize {
        self.lock()
            .presence_listeners
            .get(user)
            .map(|l| l.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Raw message document, as stored.
    pub fn raw_message(&self, chat_id: &ChatId, id: &str) -> Option<Value> {
        self.lock()
            .messages
            .get(chat_id)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Store a raw document without validation, as another client or an
    /// older app version might have written it.
    pub fn put_raw_message(&self, chat_id: &ChatId, id: &str, data: Value) {
        let mut state = self.lock();
        let existed = state
            .messages
            .entry(chat_id.clone())
            .or_default()
            .insert(id.to_string(), data.clone())
            .is_some();
        let change = DocumentChange {
            kind: if existed {
                ChangeKind::Modified
            } else {
                ChangeKind::Added
            },
            doc_id: id.to_string(),
            data,
        };
        emit(state.message_listeners.get_mut(chat_id), vec![change]);
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn set_message(&self, chat_id: &ChatId, doc: MessageDoc) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::SetMessage)?;
        if doc.id.is_empty() {
            return Err(RemoteError::Rejected("message id is required".into()));
        }

        let id = doc.id.clone();
        let data = serde_json::to_value(&doc).map_err(ripple_shared::SharedError::from)?;
        let existed = state
            .messages
            .entry(chat_id.clone())
            .or_default()
            .insert(id.clone(), data.clone())
            .is_some();

        let kind = if existed {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        debug!(chat = %chat_id, id = %id, ?kind, "memory backend: message written");
        emit(
            state.message_listeners.get_mut(chat_id),
            vec![DocumentChange {
                kind,
                doc_id: id,
                data,
            }],
        );
        Ok(())
    }

    async fn edit_message(&self, chat_id: &ChatId, id: &MessageId, text: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::EditMessage)?;

        let data = {
            let doc = state
                .messages
                .get_mut(chat_id)
                .and_then(|docs| docs.get_mut(id.as_str()))
                .ok_or_else(|| RemoteError::NotFound(format!("{chat_id}/{id}")))?;
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("text".into(), Value::String(text.to_string()));
                obj.insert("edited".into(), Value::Bool(true));
            }
            doc.clone()
        };

        emit(
            state.message_listeners.get_mut(chat_id),
            vec![DocumentChange {
                kind: ChangeKind::Modified,
                doc_id: id.to_string(),
                data,
            }],
        );
        Ok(())
    }

    async fn delete_message(&self, chat_id: &ChatId, id: &MessageId) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::DeleteMessage)?;

        let removed = state
            .messages
            .get_mut(chat_id)
            .and_then(|docs| docs.remove(id.as_str()));

        if let Some(data) = removed {
            emit(
                state.message_listeners.get_mut(chat_id),
                vec![DocumentChange {
                    kind: ChangeKind::Removed,
                    doc_id: id.to_string(),
                    data,
                }],
            );
        }
        Ok(())
    }

    async fn list_messages(&self, chat_id: &ChatId) -> Result<Vec<MessageDoc>> {
        let mut state = self.lock();
        state.check(Operation::ListMessages)?;

        let mut docs = Vec::new();
        for (doc_id, data) in state.sorted_messages(chat_id) {
            match decode_document::<MessageDoc>(data) {
                Ok(mut doc) => {
                    doc.id = doc_id;
                    docs.push(doc);
                }
                Err(e) => warn!(chat = %chat_id, id = %doc_id, error = %e, "skipping undecodable message"),
            }
        }
        Ok(docs)
    }

    fn watch_messages(&self, chat_id: &ChatId) -> Result<Subscription<Vec<DocumentChange>>> {
        let (tx, sub) = Subscription::channel(format!("messages:{chat_id}"));
        let mut state = self.lock();

        let initial: Vec<DocumentChange> = state
            .sorted_messages(chat_id)
            .into_iter()
            .map(|(doc_id, data)| DocumentChange {
                kind: ChangeKind::Added,
                doc_id,
                data,
            })
            .collect();
        if !initial.is_empty() {
            let _ = tx.send(Ok(initial));
        }
        state
            .message_listeners
            .entry(chat_id.clone())
            .or_default()
            .push(tx);

        let weak = self.weak();
        let key = chat_id.clone();
        Ok(sub.on_close(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                prune(&mut state.message_listeners, &key);
            }
        }))
    }

    async fn update_chat(&self, chat_id: &ChatId, update: ChatUpdate) -> Result<()> {
        let latency = {
            let mut state = self.lock();
            state.check(Operation::UpdateChat)?;

            let doc = {
                let doc = state.chats.entry(chat_id.clone()).or_default();
                doc.apply(&update);
                doc.clone()
            };
            emit(state.chat_listeners.get_mut(chat_id), Some(doc));
            state.latency.get(&Operation::UpdateChat).copied()
        };
        reply_after(latency).await;
        Ok(())
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<ChatDoc>> {
        Ok(self.lock().chats.get(chat_id).cloned())
    }

    fn watch_chat(&self, chat_id: &ChatId) -> Result<Subscription<Option<ChatDoc>>> {
        let (tx, sub) = Subscription::channel(format!("chat:{chat_id}"));
        let mut state = self.lock();
        let _ = tx.send(Ok(state.chats.get(chat_id).cloned()));
        state.chat_listeners.entry(chat_id.clone()).or_default().push(tx);

        let weak = self.weak();
        let key = chat_id.clone();
        Ok(sub.on_close(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                prune(&mut state.chat_listeners, &key);
            }
        }))
    }

    async fn set_presence(&self, user: &UserId, presence: PresenceDoc) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::SetPresence)?;
        state.presence.insert(user.clone(), presence);
        emit(state.presence_listeners.get_mut(user), Some(presence));
        Ok(())
    }

    async fn get_presence(&self, user: &UserId) -> Result<Option<PresenceDoc>> {
        Ok(self.lock().presence.get(user).copied())
    }

    fn watch_presence(&self, user: &UserId) -> Result<Subscription<Option<PresenceDoc>>> {
        let (tx, sub) = Subscription::channel(format!("presence:{user}"));
        let mut state = self.lock();
        let _ = tx.send(Ok(state.presence.get(user).copied()));
        state.presence_listeners.entry(user.clone()).or_default().push(tx);

        let weak = self.weak();
        let key = user.clone();
        Ok(sub.on_close(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                prune(&mut state.presence_listeners, &key);
            }
        }))
    }

    async fn put_user(&self, profile: UserProfile) -> Result<()> {
        if profile.uid.is_empty() {
            return Err(RemoteError::Rejected("user uid is required".into()));
        }
        self.lock().users.insert(profile.uid.clone(), profile);
        Ok(())
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<UserProfile>> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id.as_str()).cloned())
            .collect())
    }

    async fn search_users(&self, prefix: &str, limit: usize) -> Result<Vec<UserProfile>> {
        let prefix = prefix.to_lowercase();
        let state = self.lock();
        let mut found: Vec<UserProfile> = state
            .users
            .values()
            .filter(|u| u.username_index.starts_with(&prefix))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.username_index.cmp(&b.username_index));
        found.truncate(limit);
        Ok(found)
    }

    async fn add_contact(&self, owner: &UserId, peer: &UserId, contact: ContactDoc) -> Result<()> {
        let mut state = self.lock();
        state.check(Operation::AddContact)?;
        state
            .contacts
            .entry(owner.clone())
            .or_default()
            .insert(peer.clone(), contact);
        let ids = state.contact_ids(owner);
        emit(state.contact_listeners.get_mut(owner), ids);
        Ok(())
    }

    async fn list_contacts(&self, owner: &UserId) -> Result<Vec<UserId>> {
        Ok(self.lock().contact_ids(owner).into_iter().collect())
    }

    fn watch_contacts(&self, owner: &UserId) -> Result<Subscription<BTreeSet<UserId>>> {
        let (tx, sub) = Subscription::channel(format!("contacts:{owner}"));
        let mut state = self.lock();
        let _ = tx.send(Ok(state.contact_ids(owner)));
        state.contact_listeners.entry(owner.clone()).or_default().push(tx);

        let weak = self.weak();
        let key = owner.clone();
        Ok(sub.on_close(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                prune(&mut state.contact_listeners, &key);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat() -> ChatId {
        ChatId("alice-bob".into())
    }

    fn doc(id: &str, text: &str, ts: i64) -> MessageDoc {
        MessageDoc {
            id: id.into(),
            sender_id: "alice".into(),
            text: text.into(),
            timestamp: Some(ts),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_batch_is_existing_docs_in_timestamp_order() {
        let backend = MemoryBackend::new();
        backend.set_message(&chat(), doc("b", "two", 20)).await.unwrap();
        backend.set_message(&chat(), doc("a", "one", 10)).await.unwrap();

        let mut sub = backend.watch_messages(&chat()).unwrap();
        let batch = sub.recv().await.unwrap();
        let ids: Vec<_> = batch.iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(batch.iter().all(|c| c.kind == ChangeKind::Added));
    }

    #[tokio::test]
    async fn writes_emit_added_modified_removed() {
        let backend = MemoryBackend::new();
        let mut sub = backend.watch_messages(&chat()).unwrap();

        backend.set_message(&chat(), doc("m1", "hi", 1)).await.unwrap();
        backend
            .edit_message(&chat(), &MessageId::from("m1"), "hello")
            .await
            .unwrap();
        backend
            .delete_message(&chat(), &MessageId::from("m1"))
            .await
            .unwrap();

        let added = sub.recv().await.unwrap();
        assert_eq!(added[0].kind, ChangeKind::Added);

        let modified = sub.recv().await.unwrap();
        assert_eq!(modified[0].kind, ChangeKind::Modified);
        assert_eq!(modified[0].data["text"], "hello");
        assert_eq!(modified[0].data["edited"], true);

        let removed = sub.recv().await.unwrap();
        assert_eq!(removed[0].kind, ChangeKind::Removed);
        assert_eq!(removed[0].doc_id, "m1");
    }

    #[tokio::test]
    async fn closing_a_subscription_deregisters_it() {
        let backend = MemoryBackend::new();
        let mut sub = backend.watch_messages(&chat()).unwrap();
        assert_eq!(backend.message_listener_count(&chat()), 1);

        sub.close();
        assert_eq!(backend.message_listener_count(&chat()), 0);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let backend = MemoryBackend::new();
        backend.fail_next(Operation::SetMessage, 1);

        assert!(matches!(
            backend.set_message(&chat(), doc("m1", "x", 1)).await,
            Err(RemoteError::Unavailable(_))
        ));
        backend.set_message(&chat(), doc("m1", "x", 1)).await.unwrap();
        assert_eq!(backend.list_messages(&chat()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_updates_merge() {
        let backend = MemoryBackend::new();
        let mut sub = backend.watch_chat(&chat()).unwrap();
        assert_eq!(sub.recv().await.unwrap(), None);

        backend
            .update_chat(
                &chat(),
                ChatUpdate::Typing {
                    user: UserId::new("bob"),
                    typing: true,
                },
            )
            .await
            .unwrap();
        backend
            .update_chat(
                &chat(),
                ChatUpdate::LastMessage {
                    text: "yo".into(),
                    timestamp: 5,
                },
            )
            .await
            .unwrap();

        let _ = sub.recv().await.unwrap();
        let doc = sub.recv().await.unwrap().unwrap();
        assert!(doc.is_typing(&UserId::new("bob")));
        assert_eq!(doc.last_message.as_deref(), Some("yo"));
    }

    #[tokio::test]
    async fn list_messages_fills_ids_and_skips_garbage() {
        let backend = MemoryBackend::new();
        backend.put_raw_message(&chat(), "raw1", json!({ "text": "no id field", "timestamp": 3 }));
        backend.put_raw_message(&chat(), "raw2", json!(42));

        let docs = backend.list_messages(&chat()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "raw1");
    }

    #[tokio::test]
    async fn search_is_case_insensitive_prefix() {
        let backend = MemoryBackend::new();
        backend
            .put_user(UserProfile::new("u1", "Alice", "alice@example.com"))
            .await
            .unwrap();
        backend
            .put_user(UserProfile::new("u2", "Albert", "al@example.com"))
            .await
            .unwrap();
        backend
            .put_user(UserProfile::new("u3", "Bob", "bob@example.com"))
            .await
            .unwrap();

        let found = backend.search_users("AL", 10).await.unwrap();
        let names: Vec<_> = found.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Albert", "Alice"]);
    }

    #[tokio::test]
    async fn contacts_are_directed() {
        let backend = MemoryBackend::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let mut bobs = backend.watch_contacts(&bob).unwrap();
        assert!(bobs.recv().await.unwrap().is_empty());

        backend
            .add_contact(&alice, &bob, ContactDoc { added_at: 1 })
            .await
            .unwrap();

        let mut alices = backend.watch_contacts(&alice).unwrap();
        assert!(alices.recv().await.unwrap().contains(&bob));
        assert_eq!(backend.message_listener_count(&chat()), 0);
        assert!(!bobs.is_closed());
    }
}
