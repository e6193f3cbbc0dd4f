//! Services shared by every chat session.
//!
//! [`ClientState`] bundles the local cache, the backend seams and the job
//! queue so each component can be built from one handle.

use std::sync::Arc;

use tracing::info;

use ripple_remote::{
    CdnUploader, DocumentStore, EndpointClient, MediaDeleter, MediaSigner, MediaUploader,
    PushNotifier,
};
use ripple_store::{Database, MessageCache};

use crate::config::ClientConfig;
use crate::contacts::ContactBook;
use crate::coordinator::ChatCoordinator;
use crate::error::Result;
use crate::jobs::JobQueue;
use crate::presence::PresenceTracker;
use crate::purge::PurgeJob;
use crate::session::SessionContext;

/// Central client state. Cheap to clone.
#[derive(Clone)]
pub struct ClientState {
    pub config: ClientConfig,

    /// The signed-in user.
    pub session: SessionContext,

    /// Local message cache, the source of truth for rendering.
    pub cache: MessageCache,

    /// Realtime document store.
    pub store: Arc<dyn DocumentStore>,

    pub signer: Arc<dyn MediaSigner>,
    pub uploader: Arc<dyn MediaUploader>,
    pub deleter: Arc<dyn MediaDeleter>,
    pub notifier: Arc<dyn PushNotifier>,

    /// Where purge jobs are handed off to.
    pub jobs: Arc<dyn JobQueue>,
}

impl ClientState {
    /// Open the local cache and build the HTTP clients described by `config`.
    pub fn connect(
        config: ClientConfig,
        session: SessionContext,
        store: Arc<dyn DocumentStore>,
        jobs: Arc<dyn JobQueue>,
    ) -> Result<Self> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        info!(path = ?db.path(), user = %session.user_id, "local cache opened");

        let endpoints = Arc::new(EndpointClient::new(
            config.endpoint_url.clone(),
            config.http_connect_timeout,
            config.http_timeout,
        )?);
        let cdn = Arc::new(CdnUploader::new(
            config.cdn_url.clone(),
            config.http_connect_timeout,
            config.http_timeout,
        )?);

        Ok(Self {
            config,
            session,
            cache: MessageCache::new(db),
            store,
            signer: endpoints.clone(),
            uploader: cdn,
            deleter: endpoints.clone(),
            notifier: endpoints,
            jobs,
        })
    }

    /// A fresh coordinator for one chat.
    pub fn coordinator(&self) -> ChatCoordinator {
        ChatCoordinator::new(self.clone())
    }

    pub fn presence(&self) -> PresenceTracker {
        PresenceTracker::new(self.store.clone(), self.session.clone())
    }

    pub fn contacts(&self) -> ContactBook {
        ContactBook::new(self.store.clone(), self.session.clone())
    }

    /// The executor for jobs this state hands off.
    pub fn purge_job(&self) -> PurgeJob {
        PurgeJob::new(self.store.clone(), self.cache.clone(), self.deleter.clone())
    }
}
