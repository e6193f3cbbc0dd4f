//! Delayed job handoff.
//!
//! The client never runs scheduled work itself. It hands keyed jobs to a
//! [`JobQueue`]; scheduling under an existing key replaces the earlier job
//! and cancelling removes it. [`JobHandoff`] forwards these commands over a
//! channel, and [`run_jobs`] is a runner for hosts without a platform job
//! scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ripple_shared::constants::AUTO_DELETE_JOB_PREFIX;
use ripple_shared::ChatId;

use crate::error::{ChatError, Result};

/// Work that can be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Delete every message of a chat.
    PurgeChat(ChatId),
}

/// Result of one job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Transient failure; run again later.
    Retry,
    /// Permanent failure; do not run again.
    Failure,
}

/// Key of a chat's auto-delete job.
pub fn auto_delete_key(chat_id: &ChatId) -> String {
    format!("{AUTO_DELETE_JOB_PREFIX}{chat_id}")
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Run `job` after `delay`, replacing any job under the same key.
    /// `due_at` is the same instant as epoch millis.
    async fn schedule(&self, key: &str, delay: Duration, due_at: i64, job: Job) -> Result<()>;

    async fn cancel(&self, key: &str) -> Result<()>;
}

/// Runs a job once.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> JobOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCommand {
    Schedule {
        key: String,
        delay: Duration,
        due_at: i64,
        job: Job,
    },
    Cancel {
        key: String,
    },
}

/// [`JobQueue`] that forwards commands to whoever owns the receiver.
#[derive(Debug, Clone)]
pub struct JobHandoff {
    tx: mpsc::Sender<JobCommand>,
}

impl JobHandoff {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    async fn send(&self, command: JobCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ChatError::JobQueueClosed)
    }
}

#[async_trait]
impl JobQueue for JobHandoff {
    async fn schedule(&self, key: &str, delay: Duration, due_at: i64, job: Job) -> Result<()> {
        debug!(key, delay_ms = delay.as_millis() as u64, due_at, "handing off job");
        self.send(JobCommand::Schedule {
            key: key.to_string(),
            delay,
            due_at,
            job,
        })
        .await
    }

    async fn cancel(&self, key: &str) -> Result<()> {
        debug!(key, "cancelling job");
        self.send(JobCommand::Cancel {
            key: key.to_string(),
        })
        .await
    }
}

/// How often a job asking for `Retry` is run again.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(30),
        }
    }
}

/// Execute commands from a [`JobHandoff`] until the sending side is gone.
///
/// Jobs still waiting when the channel closes keep running.
pub async fn run_jobs(
    mut rx: mpsc::Receiver<JobCommand>,
    executor: Arc<dyn JobExecutor>,
    policy: RetryPolicy,
) {
    let mut scheduled: HashMap<String, JoinHandle<()>> = HashMap::new();
    info!("job runner started");

    while let Some(command) = rx.recv().await {
        scheduled.retain(|_, handle| !handle.is_finished());

        match command {
            JobCommand::Schedule {
                key, delay, job, ..
            } => {
                if let Some(previous) = scheduled.remove(&key) {
                    debug!(key = %key, "replacing scheduled job");
                    previous.abort();
                }
                let handle = tokio::spawn(run_with_retry(
                    key.clone(),
                    tokio::time::Instant::now() + delay,
                    job,
                    executor.clone(),
                    policy,
                ));
                scheduled.insert(key, handle);
            }
            JobCommand::Cancel { key } => {
                if let Some(handle) = scheduled.remove(&key) {
                    handle.abort();
                    info!(key = %key, "job cancelled");
                }
            }
        }
    }

    info!(pending = scheduled.len(), "job runner stopped");
}

async fn run_with_retry(
    key: String,
    deadline: tokio::time::Instant,
    job: Job,
    executor: Arc<dyn JobExecutor>,
    policy: RetryPolicy,
) {
    tokio::time::sleep_until(deadline).await;

    let mut backoff = policy.backoff;
    for attempt in 1..=policy.max_attempts.max(1) {
        match executor.execute(&job).await {
            JobOutcome::Success => {
                info!(key = %key, attempt, "job finished");
                return;
            }
            JobOutcome::Failure => {
                warn!(key = %key, attempt, "job failed permanently");
                return;
            }
            JobOutcome::Retry if attempt < policy.max_attempts => {
                warn!(key = %key, attempt, retry_in_ms = backoff.as_millis() as u64, "job will retry");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            JobOutcome::Retry => {}
        }
    }
    warn!(key = %key, "job gave up after {} attempts", policy.max_attempts);
}
