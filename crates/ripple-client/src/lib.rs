//! # ripple-client
//!
//! Chat sync core: keeps a local message cache in step with the realtime
//! document store, sends messages optimistically, and exposes a chat
//! session as observable state.
//!
//! - [`ChatCoordinator`] owns one open chat and its remote listeners.
//! - [`ChatView`] mirrors a coordinator into `watch` channels for a UI.
//! - [`ClientState`] wires the cache, backend seams and job queue together.

pub mod config;
pub mod contacts;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod jobs;
pub mod presence;
pub mod purge;
pub mod session;
pub mod state;
pub mod sync_bridge;
pub mod typing;
pub mod view;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use contacts::ContactBook;
pub use coordinator::{ChatCoordinator, SessionPhase};
pub use error::{ChatError, Result};
pub use events::ChatEvent;
pub use jobs::{run_jobs, Job, JobCommand, JobExecutor, JobHandoff, JobOutcome, JobQueue, RetryPolicy};
pub use presence::PresenceTracker;
pub use purge::PurgeJob;
pub use session::SessionContext;
pub use state::ClientState;
pub use sync_bridge::{MessageEvent, MessageFeed, RemoteSyncAdapter};
pub use view::{AutoDeleteState, ChatView, PeerStatus};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling this twice is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("ripple_client=debug,ripple_remote=debug,ripple_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
