use std::sync::Arc;

use tracing::info;

use ripple_remote::{DocumentStore, Subscription};
use ripple_shared::clock::now_millis;
use ripple_shared::protocol::PresenceDoc;
use ripple_shared::UserId;

use crate::error::Result;
use crate::session::SessionContext;

/// Publishes the signed-in user's online state and watches other users'.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
    session: SessionContext,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DocumentStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    /// App came to the foreground.
    pub async fn on_foreground(&self) -> Result<()> {
        self.publish(true).await
    }

    /// App went to the background.
    pub async fn on_background(&self) -> Result<()> {
        self.publish(false).await
    }

    async fn publish(&self, online: bool) -> Result<()> {
        let doc = PresenceDoc {
            online,
            last_seen: now_millis(),
        };
        self.store.set_presence(&self.session.user_id, doc).await?;
        info!(user = %self.session.user_id, online, "presence updated");
        Ok(())
    }

    pub async fn get(&self, user: &UserId) -> Result<Option<PresenceDoc>> {
        Ok(self.store.get_presence(user).await?)
    }

    pub fn watch(&self, user: &UserId) -> Result<Subscription<Option<PresenceDoc>>> {
        Ok(self.store.watch_presence(user)?)
    }
}
