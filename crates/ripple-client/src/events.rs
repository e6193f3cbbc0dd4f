use std::time::Duration;

use ripple_shared::protocol::PresenceDoc;
use ripple_shared::MessageId;

/// Notifications a chat session broadcasts to whoever presents it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The peer's typing flag changed.
    PeerTyping(bool),

    /// The peer's presence document changed. `None` if they never published one.
    PeerPresence(Option<PresenceDoc>),

    /// Auto-delete was switched on, off, or its due time moved.
    AutoDeleteChanged {
        after: Option<Duration>,
        due_at: Option<i64>,
    },

    /// The backend rejected a message write. The local row is marked failed.
    SendFailed { message_id: MessageId, reason: String },

    /// The session was closed.
    Closed,
}

/// Capacity of the per-session event channel.
pub const EVENT_CAPACITY: usize = 64;
