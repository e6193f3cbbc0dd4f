use ripple_shared::UserId;

/// The signed-in user, handed to every component that acts on their behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: UserId,
    /// Shown as the push notification title.
    pub display_name: String,
}

impl SessionContext {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}
