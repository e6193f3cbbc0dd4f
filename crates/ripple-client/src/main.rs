//! Terminal demo of the chat core.
//!
//! Two users share an in-process backend, each with their own cache and job
//! runner. Lines typed on stdin are sent as "alice"; "bob" echoes what he
//! sees. Commands:
//!
//! - `/media <path>`  upload a file through the configured endpoints
//! - `/auto <secs>`   switch auto-delete on (`/auto 0` switches it off)
//! - `/delete`        delete the last message alice sent
//! - `/quit`          leave the chat

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use ripple_client::{
    init_logging, run_jobs, ChatCoordinator, ChatView, ClientConfig, ClientState, JobHandoff,
    RetryPolicy, SessionContext,
};
use ripple_remote::{MediaUpload, MemoryBackend};
use ripple_shared::{ChatId, MessageId, UserId};
use ripple_store::MessageCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let backend = Arc::new(MemoryBackend::new());
    let (alice_jobs, alice_job_rx) = JobHandoff::channel(32);
    let (bob_jobs, bob_job_rx) = JobHandoff::channel(32);

    let alice_id = UserId::new("alice");
    let bob_id = UserId::new("bob");
    let chat_id = ChatId::for_participants(&alice_id, &bob_id);

    let alice = ClientState::connect(
        config,
        SessionContext::new(alice_id.clone(), "Alice"),
        backend.clone(),
        Arc::new(alice_jobs),
    )?;
    let bob = ClientState {
        session: SessionContext::new(bob_id.clone(), "Bob"),
        cache: MessageCache::in_memory()?,
        jobs: Arc::new(bob_jobs),
        ..alice.clone()
    };

    tokio::spawn(run_jobs(alice_job_rx, Arc::new(alice.purge_job()), RetryPolicy::default()));
    tokio::spawn(run_jobs(bob_job_rx, Arc::new(bob.purge_job()), RetryPolicy::default()));

    alice.presence().on_foreground().await?;
    bob.presence().on_foreground().await?;

    let alice_view = ChatView::open(
        Arc::new(ChatCoordinator::new(alice.clone())),
        chat_id.clone(),
        bob_id.clone(),
    )
    .await?;
    let bob_view = ChatView::open(
        Arc::new(ChatCoordinator::new(bob.clone())),
        chat_id.clone(),
        alice_id.clone(),
    )
    .await?;

    let mut bob_inbox = bob_view.messages();
    tokio::spawn(async move {
        let mut seen = 0;
        while bob_inbox.changed().await.is_ok() {
            let rows = bob_inbox.borrow_and_update().clone();
            for message in rows.iter().skip(seen) {
                let body = message.media_url.as_deref().unwrap_or(&message.text);
                println!("[bob sees] {}: {}", message.sender_id, body);
            }
            seen = rows.len();
        }
    });

    let mut last_sent: Option<MessageId> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        let result = if line == "/quit" {
            break;
        } else if let Some(path) = line.strip_prefix("/media ") {
            match tokio::fs::read(path.trim()).await {
                Ok(bytes) => {
                    let name = std::path::Path::new(path.trim())
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "upload".to_string());
                    alice_view
                        .send_media(MediaUpload::from_file(name, bytes))
                        .await
                        .map(|id| last_sent = Some(id))
                }
                Err(e) => {
                    eprintln!("cannot read {path}: {e}");
                    continue;
                }
            }
        } else if let Some(secs) = line.strip_prefix("/auto ") {
            let Ok(secs) = secs.trim().parse::<u64>() else {
                eprintln!("usage: /auto <secs>");
                continue;
            };
            alice_view
                .set_auto_delete(Some(Duration::from_secs(secs)))
                .await
                .map(|due| println!("auto-delete due at {due:?}"))
        } else if line == "/delete" {
            match last_sent.take() {
                Some(id) => alice_view.delete(&id).await,
                None => continue,
            }
        } else {
            alice_view.on_text_changed(line).await;
            alice_view.send(line).await.map(|id| last_sent = Some(id))
        };

        if let Err(e) = result {
            eprintln!("error: {e}");
            alice_view.dismiss_error();
        }
    }

    alice_view.leave().await;
    bob_view.leave().await;
    alice.presence().on_background().await?;
    info!("bye");
    Ok(())
}
