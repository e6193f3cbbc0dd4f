//! Contact list and user directory search.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use ripple_remote::{DocumentStore, Subscription};
use ripple_shared::clock::now_millis;
use ripple_shared::protocol::{ContactDoc, UserProfile};
use ripple_shared::UserId;

use crate::error::{ChatError, Result};
use crate::session::SessionContext;

const SEARCH_LIMIT: usize = 20;

#[derive(Clone)]
pub struct ContactBook {
    store: Arc<dyn DocumentStore>,
    session: SessionContext,
}

impl ContactBook {
    pub fn new(store: Arc<dyn DocumentStore>, session: SessionContext) -> Self {
        Self { store, session }
    }

    /// Add a directed contact edge from the current user to `peer`.
    pub async fn add_contact(&self, peer: &UserId) -> Result<()> {
        if *peer == self.session.user_id {
            return Err(ChatError::SelfContact);
        }
        self.store
            .add_contact(
                &self.session.user_id,
                peer,
                ContactDoc {
                    added_at: now_millis(),
                },
            )
            .await?;
        info!(owner = %self.session.user_id, peer = %peer, "contact added");
        Ok(())
    }

    /// Contact profiles, sorted by name ignoring case.
    pub async fn contacts(&self) -> Result<Vec<UserProfile>> {
        let ids = self.store.list_contacts(&self.session.user_id).await?;
        let mut profiles = self.store.get_users(&ids).await?;
        profiles.sort_by_key(|p| p.name.to_lowercase());
        Ok(profiles)
    }

    pub fn watch_contacts(&self) -> Result<Subscription<BTreeSet<UserId>>> {
        Ok(self.store.watch_contacts(&self.session.user_id)?)
    }

    /// Prefix search over user names, without the current user.
    pub async fn search(&self, query: &str) -> Result<Vec<UserProfile>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut found = self
            .store
            .search_users(&query.to_lowercase(), SEARCH_LIMIT + 1)
            .await?;
        found.retain(|p| p.uid != self.session.user_id.as_str());
        found.truncate(SEARCH_LIMIT);
        Ok(found)
    }
}
