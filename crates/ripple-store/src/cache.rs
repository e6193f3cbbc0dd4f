//! Async, observable facade over [`Database`].
//!
//! [`MessageCache`] is the single shared mutable resource between the chat
//! coordinator and the presentation layer. SQLite work runs on the blocking
//! pool behind one mutex; every write that touches a chat re-queries that
//! chat and pushes the fresh snapshot to its live queries while still holding
//! the lock, so snapshots are emitted in write order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use ripple_shared::{ChatId, MessageId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{DeliveryState, Message};

type Feeds = HashMap<ChatId, watch::Sender<Vec<Message>>>;

struct Inner {
    db: Mutex<Database>,
    feeds: Mutex<Feeds>,
}

impl Inner {
    /// Push the current rows of `chat_id` to its subscribers, if any.
    fn publish(&self, db: &Database, chat_id: &ChatId) -> Result<()> {
        let mut feeds = self.feeds.lock().map_err(|_| StoreError::LockPoisoned)?;
        let Some(tx) = feeds.get(chat_id) else {
            return Ok(());
        };
        if tx.receiver_count() == 0 {
            feeds.remove(chat_id);
            return Ok(());
        }
        let snapshot = db.messages_for_chat(chat_id)?;
        debug!(chat = %chat_id, rows = snapshot.len(), "live query re-emit");
        tx.send_replace(snapshot);
        Ok(())
    }
}

/// Shared handle to the local message cache. Cheap to clone.
#[derive(Clone)]
pub struct MessageCache {
    inner: Arc<Inner>,
}

impl MessageCache {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Inner {
                db: Mutex::new(db),
                feeds: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Cache backed by a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner, &Database) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let db = inner.db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&*inner, &*db)
        })
        .await?
    }

    /// Subscribe to the ordered message list of a chat. The returned query
    /// already holds the current rows.
    pub async fn live_query(&self, chat_id: &ChatId) -> Result<LiveQuery> {
        let chat_id = chat_id.clone();
        self.run(move |inner, db| {
            let mut feeds = inner.feeds.lock().map_err(|_| StoreError::LockPoisoned)?;
            // An existing feed is current: every write publishes under the db lock.
            let rx = match feeds.get(&chat_id) {
                Some(tx) => tx.subscribe(),
                None => {
                    let snapshot = db.messages_for_chat(&chat_id)?;
                    let (tx, rx) = watch::channel(snapshot);
                    feeds.insert(chat_id.clone(), tx);
                    rx
                }
            };
            Ok(LiveQuery { chat_id, rx })
        })
        .await
    }

    /// Insert or replace by message id.
    pub async fn upsert(&self, message: Message) -> Result<()> {
        self.run(move |inner, db| {
            // A message never moves between chats, but if the id was cached
            // under another chat that chat's feed must drop it.
            let previous_chat = db.chat_of_message(&message.id)?;
            db.upsert_message(&message)?;
            if let Some(prev) = previous_chat.filter(|c| *c != message.chat_id) {
                inner.publish(db, &prev)?;
            }
            inner.publish(db, &message.chat_id)
        })
        .await
    }

    /// Remove by id. Returns `true` if the message was cached.
    pub async fn delete(&self, id: &MessageId) -> Result<bool> {
        let id = id.clone();
        self.run(move |inner, db| {
            let Some(chat_id) = db.chat_of_message(&id)? else {
                return Ok(false);
            };
            let deleted = db.delete_message(&id)?;
            inner.publish(db, &chat_id)?;
            Ok(deleted)
        })
        .await
    }

    /// Remove every row of a chat.
    pub async fn clear(&self, chat_id: &ChatId) -> Result<usize> {
        let chat_id = chat_id.clone();
        self.run(move |inner, db| {
            let removed = db.clear_chat(&chat_id)?;
            inner.publish(db, &chat_id)?;
            Ok(removed)
        })
        .await
    }

    pub async fn mark_failed(&self, id: &MessageId) -> Result<bool> {
        self.set_delivery_state(id, DeliveryState::Failed).await
    }

    pub async fn set_delivery_state(&self, id: &MessageId, state: DeliveryState) -> Result<bool> {
        let id = id.clone();
        self.run(move |inner, db| {
            let Some(chat_id) = db.chat_of_message(&id)? else {
                return Ok(false);
            };
            let updated = db.set_delivery_state(&id, state)?;
            inner.publish(db, &chat_id)?;
            Ok(updated)
        })
        .await
    }

    pub async fn get(&self, id: &MessageId) -> Result<Option<Message>> {
        let id = id.clone();
        self.run(move |_, db| match db.get_message(&id) {
            Ok(m) => Ok(Some(m)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    pub async fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let chat_id = chat_id.clone();
        self.run(move |_, db| db.messages_for_chat(&chat_id)).await
    }

    pub async fn last_timestamp(&self, chat_id: &ChatId) -> Result<Option<i64>> {
        let chat_id = chat_id.clone();
        self.run(move |_, db| db.last_message_timestamp(&chat_id))
            .await
    }
}

/// A live, timestamp-ordered view of one chat.
#[derive(Debug, Clone)]
pub struct LiveQuery {
    chat_id: ChatId,
    rx: watch::Receiver<Vec<Message>>,
}

impl LiveQuery {
    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// The most recent snapshot.
    pub fn current(&self) -> Vec<Message> {
        self.rx.borrow().clone()
    }

    /// Wait for the next emission and return it.
    pub async fn changed(&mut self) -> Result<Vec<Message>> {
        self.rx.changed().await.map_err(|_| StoreError::FeedClosed)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    pub fn into_receiver(self) -> watch::Receiver<Vec<Message>> {
        self.rx
    }
}
