//! The scheduled auto-delete job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use ripple_remote::{public_id_from_url, DocumentStore, MediaDeleter};
use ripple_shared::protocol::ChatUpdate;
use ripple_shared::{ChatId, MessageId};
use ripple_store::MessageCache;

use crate::error::Result;
use crate::jobs::{Job, JobExecutor, JobOutcome};

/// Deletes a whole chat history: remote messages, hosted media, local rows,
/// and the chat preview.
#[derive(Clone)]
pub struct PurgeJob {
    store: Arc<dyn DocumentStore>,
    cache: MessageCache,
    deleter: Arc<dyn MediaDeleter>,
}

impl PurgeJob {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: MessageCache,
        deleter: Arc<dyn MediaDeleter>,
    ) -> Self {
        Self {
            store,
            cache,
            deleter,
        }
    }

    pub async fn run(&self, chat_id: &ChatId) -> JobOutcome {
        if chat_id.is_blank() {
            error!("purge job without a chat id");
            return JobOutcome::Failure;
        }

        match self.purge(chat_id).await {
            Ok(removed) => {
                info!(chat = %chat_id, removed, "chat history purged");
                JobOutcome::Success
            }
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "purge failed, will retry");
                JobOutcome::Retry
            }
        }
    }

    async fn purge(&self, chat_id: &ChatId) -> Result<usize> {
        let docs = self.store.list_messages(chat_id).await?;
        let removed = docs.len();

        for doc in docs {
            self.store
                .delete_message(chat_id, &MessageId(doc.id.clone()))
                .await?;

            if let Some(public_id) = doc.media_url.as_deref().and_then(public_id_from_url) {
                if let Err(e) = self.deleter.delete_media(&public_id).await {
                    warn!(chat = %chat_id, public_id = %public_id, error = %e, "media delete failed");
                }
            }
        }

        self.cache.clear(chat_id).await?;
        self.store
            .update_chat(chat_id, ChatUpdate::ClearHistory)
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl JobExecutor for PurgeJob {
    async fn execute(&self, job: &Job) -> JobOutcome {
        match job {
            Job::PurgeChat(chat_id) => self.run(chat_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMedia;
    use ripple_remote::{MemoryBackend, Operation};
    use ripple_shared::protocol::MessageDoc;
    use ripple_shared::UserId;
    use ripple_store::Message;

    fn chat() -> ChatId {
        ChatId("alice-bob".into())
    }

    async fn seed(backend: &MemoryBackend, cache: &MessageCache) {
        backend
            .set_message(
                &chat(),
                MessageDoc {
                    id: "m1".into(),
                    sender_id: "alice".into(),
                    text: "hello".into(),
                    timestamp: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        backend
            .set_message(
                &chat(),
                MessageDoc {
                    id: "m2".into(),
                    sender_id: "bob".into(),
                    timestamp: Some(2),
                    is_media: true,
                    media_type: Some("image".into()),
                    media_url: Some(
                        "https://res.cloudinary.com/demo/image/upload/v9/chat/pic.jpg".into(),
                    ),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        backend
            .update_chat(
                &chat(),
                ChatUpdate::LastMessage {
                    text: "hello".into(),
                    timestamp: 2,
                },
            )
            .await
            .unwrap();
        cache
            .upsert(Message::text(
                MessageId::from("m1"),
                chat(),
                UserId::new("alice"),
                "hello",
                1,
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn purge_removes_everything() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = MessageCache::in_memory().unwrap();
        let media = Arc::new(RecordingMedia::default());
        seed(&backend, &cache).await;

        let job = PurgeJob::new(backend.clone(), cache.clone(), media.clone());
        assert_eq!(job.run(&chat()).await, JobOutcome::Success);

        assert!(backend.list_messages(&chat()).await.unwrap().is_empty());
        assert!(cache.messages_for_chat(&chat()).await.unwrap().is_empty());
        assert_eq!(media.deleted(), vec!["chat/pic".to_string()]);

        let doc = backend.get_chat(&chat()).await.unwrap().unwrap();
        assert_eq!(doc.last_message, None);
        assert_eq!(doc.auto_delete_after_millis, None);
    }

    #[tokio::test]
    async fn blank_chat_id_is_permanent_failure() {
        let backend = Arc::new(MemoryBackend::new());
        let job = PurgeJob::new(
            backend,
            MessageCache::in_memory().unwrap(),
            Arc::new(RecordingMedia::default()),
        );
        assert_eq!(job.run(&ChatId(" ".into())).await, JobOutcome::Failure);
    }

    #[tokio::test]
    async fn backend_errors_ask_for_retry() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = MessageCache::in_memory().unwrap();
        seed(&backend, &cache).await;
        backend.fail_next(Operation::DeleteMessage, 1);

        let job = PurgeJob::new(
            backend.clone(),
            cache.clone(),
            Arc::new(RecordingMedia::default()),
        );
        assert_eq!(job.run(&chat()).await, JobOutcome::Retry);
        assert_eq!(job.run(&chat()).await, JobOutcome::Success);
        assert!(backend.list_messages(&chat()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn media_delete_errors_do_not_fail_the_job() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = MessageCache::in_memory().unwrap();
        seed(&backend, &cache).await;
        let media = Arc::new(RecordingMedia::default());
        media.fail_deletes();

        let job = PurgeJob::new(backend.clone(), cache, media);
        assert_eq!(
            job.execute(&Job::PurgeChat(chat())).await,
            JobOutcome::Success
        );
    }
}
