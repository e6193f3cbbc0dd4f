//! Typing indicator with a debounced clear.
//!
//! A keystroke raises the flag and (re)arms a single timer; the flag is
//! cleared once the timer runs out without another keystroke.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ripple_remote::DocumentStore;
use ripple_shared::protocol::ChatUpdate;
use ripple_shared::{ChatId, UserId};

use crate::error::Result;

struct Shared {
    store: Arc<dyn DocumentStore>,
    chat_id: ChatId,
    user: UserId,
    /// What we last wrote.
    typing: AtomicBool,
}

impl Shared {
    /// The flag is recorded before the write is sent, so a write cut short
    /// after it landed still leaves the recorded value matching the backend.
    async fn write(&self, typing: bool) -> Result<()> {
        let previous = self.typing.swap(typing, Ordering::SeqCst);
        let result = self
            .store
            .update_chat(
                &self.chat_id,
                ChatUpdate::Typing {
                    user: self.user.clone(),
                    typing,
                },
            )
            .await;
        if let Err(e) = result {
            self.typing.store(previous, Ordering::SeqCst);
            return Err(e.into());
        }
        debug!(chat = %self.chat_id, typing, "typing flag written");
        Ok(())
    }
}

pub struct TypingDebouncer {
    shared: Arc<Shared>,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TypingDebouncer {
    pub fn new(store: Arc<dyn DocumentStore>, chat_id: ChatId, user: UserId, delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                chat_id,
                user,
                typing: AtomicBool::new(false),
            }),
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.shared.typing.load(Ordering::SeqCst)
    }

    /// Raise the flag and restart the clear timer.
    pub async fn keystroke(&self) -> Result<()> {
        self.rearm();
        if !self.is_typing() {
            self.shared.write(true).await?;
        }
        Ok(())
    }

    /// Write the flag directly. Clearing also disarms the timer.
    pub async fn set(&self, typing: bool) -> Result<()> {
        if !typing {
            self.disarm();
        }
        self.shared.write(typing).await
    }

    /// Drop the timer; if the flag is up, take it down.
    pub async fn shutdown(&self) {
        self.disarm();
        if self.is_typing() {
            if let Err(e) = self.shared.write(false).await {
                warn!(chat = %self.shared.chat_id, error = %e, "failed to clear typing flag");
            }
        }
    }

    fn rearm(&self) {
        let shared = self.shared.clone();
        let deadline = tokio::time::Instant::now() + self.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Err(e) = shared.write(false).await {
                warn!(chat = %shared.chat_id, error = %e, "failed to clear typing flag");
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(timer) {
            previous.abort();
        }
    }

    fn disarm(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = pending.take() {
            timer.abort();
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.disarm();
    }
}
