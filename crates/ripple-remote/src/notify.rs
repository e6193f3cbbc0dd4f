use async_trait::async_trait;

use ripple_shared::protocol::NotificationRequest;

use crate::error::Result;

/// Asks the push service to notify an offline recipient. Delivery itself is
/// out of our hands; success only means the trigger was accepted.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, request: &NotificationRequest) -> Result<()>;
}
