//! Recording fakes for the media and push seams, and a wired-up
//! [`ClientState`] for session tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ripple_remote::{
    MediaDeleter, MediaSigner, MediaUpload, MediaUploader, MemoryBackend, PushNotifier,
    RemoteError, Result as RemoteResult,
};
use ripple_shared::protocol::{NotificationRequest, UploadAuthorization, UploadedMedia};
use ripple_shared::UserId;
use ripple_store::MessageCache;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::jobs::{JobCommand, JobHandoff};
use crate::session::SessionContext;
use crate::state::ClientState;

#[derive(Default)]
pub struct RecordingMedia {
    fail_authorize: AtomicBool,
    fail_upload: AtomicBool,
    fail_delete: AtomicBool,
    uploads: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl RecordingMedia {
    pub fn fail_authorize(&self) {
        self.fail_authorize.store(true, Ordering::SeqCst);
    }

    pub fn fail_upload(&self) {
        self.fail_upload.store(true, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSigner for RecordingMedia {
    async fn authorize_upload(&self) -> RemoteResult<UploadAuthorization> {
        if self.fail_authorize.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                body: "signer down".into(),
            });
        }
        Ok(UploadAuthorization {
            signature: "sig".into(),
            timestamp: 1,
            upload_preset: "chat".into(),
            cloud_name: "demo".into(),
            api_key: "key".into(),
        })
    }
}

#[async_trait]
impl MediaUploader for RecordingMedia {
    async fn upload(
        &self,
        auth: &UploadAuthorization,
        media: MediaUpload,
    ) -> RemoteResult<UploadedMedia> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 400,
                body: "bad upload".into(),
            });
        }
        self.uploads.lock().unwrap().push(media.file_name.clone());
        let stem = media
            .file_name
            .rsplit_once('.')
            .map(|(s, _)| s.to_string())
            .unwrap_or_else(|| media.file_name.clone());
        Ok(UploadedMedia {
            secure_url: format!(
                "https://res.cloudinary.com/{}/{}/upload/v1/chat/{}",
                auth.cloud_name,
                media.media_type.resource_type(),
                media.file_name
            ),
            public_id: format!("chat/{stem}"),
        })
    }
}

#[async_trait]
impl MediaDeleter for RecordingMedia {
    async fn delete_media(&self, public_id: &str) -> RemoteResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("cdn down".into()));
        }
        self.deleted.lock().unwrap().push(public_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    fail: AtomicBool,
    sent: Mutex<Vec<NotificationRequest>>,
}

impl RecordingNotifier {
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushNotifier for RecordingNotifier {
    async fn notify(&self, request: &NotificationRequest) -> RemoteResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("push down".into()));
        }
        self.sent.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Let spawned listener tasks catch up.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Client state for "alice" over an in-memory backend and cache.
pub struct TestClient {
    pub backend: Arc<MemoryBackend>,
    pub media: Arc<RecordingMedia>,
    pub notifier: Arc<RecordingNotifier>,
    pub jobs: mpsc::Receiver<JobCommand>,
    pub state: ClientState,
}

pub fn test_client() -> TestClient {
    let backend = Arc::new(MemoryBackend::new());
    let media = Arc::new(RecordingMedia::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (queue, jobs) = JobHandoff::channel(16);
    let state = ClientState {
        config: ClientConfig::default(),
        session: SessionContext::new(UserId::new("alice"), "Alice"),
        cache: MessageCache::in_memory().unwrap(),
        store: backend.clone(),
        signer: media.clone(),
        uploader: media.clone(),
        deleter: media.clone(),
        notifier: notifier.clone(),
        jobs: Arc::new(queue),
    };
    TestClient {
        backend,
        media,
        notifier,
        jobs,
        state,
    }
}
