//! Cancellable realtime subscriptions.
//!
//! A backend listener pushes values into an unbounded channel so it never
//! blocks on a slow consumer. The consumer owns a [`Subscription`] and
//! removes the listener with [`Subscription::close`] (or by dropping it).

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{RemoteError, Result};

/// Producer half handed to the backend listener.
pub type Emitter<T> = mpsc::UnboundedSender<Result<T>>;

type CloseHook = Box<dyn FnOnce() + Send + Sync>;

/// Consumer half of a realtime listener.
pub struct Subscription<T> {
    label: String,
    rx: mpsc::UnboundedReceiver<Result<T>>,
    on_close: Option<CloseHook>,
    closed: bool,
}

impl<T> Subscription<T> {
    /// Create a linked emitter / subscription pair.
    pub fn channel(label: impl Into<String>) -> (Emitter<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Self {
            label: label.into(),
            rx,
            on_close: None,
            closed: false,
        };
        (tx, sub)
    }

    /// Run `hook` once when the subscription is closed, e.g. to deregister
    /// the listener on the backend side.
    pub fn on_close(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Next value, `Some(Err(_))` for a listener error, `None` once the
    /// listener is gone or the subscription was closed.
    pub async fn next(&mut self) -> Option<Result<T>> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Like [`next`](Self::next) but flattens the end of stream into an error.
    pub async fn recv(&mut self) -> Result<T> {
        self.next().await.unwrap_or(Err(RemoteError::SubscriptionClosed))
    }

    /// Remove the listener. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rx.close();
        if let Some(hook) = self.on_close.take() {
            hook();
        }
        debug!(subscription = %self.label, "subscription closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("closed", &self.closed)
            .finish()
    }
}
