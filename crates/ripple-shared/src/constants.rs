/// Application name, used as the push notification fallback title
pub const APP_NAME: &str = "RippleChat";

/// Remote collections
pub const USERS_COLLECTION: &str = "users";
pub const CHATS_COLLECTION: &str = "chats";
pub const MESSAGES_COLLECTION: &str = "messages";
pub const PRESENCE_COLLECTION: &str = "presence";
pub const CONTACTS_COLLECTION: &str = "contacts";

/// Delay after the last keystroke before the typing flag is cleared
pub const TYPING_CLEAR_DELAY_MS: u64 = 1200;

/// Side endpoints, relative to the endpoint host
pub const UPLOAD_AUTH_PATH: &str = "/cloudinary-auth";
pub const MEDIA_DELETE_PATH: &str = "/cloudinary-delete";
pub const NOTIFICATION_PATH: &str = "/send-fcm-notification";

/// Default endpoint host (signing, push trigger, media delete)
pub const DEFAULT_ENDPOINT_URL: &str = "https://auth-server-imagekit-for-ripplechat.onrender.com";

/// Default CDN upload API base
pub const DEFAULT_CDN_URL: &str = "https://api.cloudinary.com/v1_1";

/// Maximum media upload size in bytes (10 MiB)
pub const MAX_MEDIA_SIZE: usize = 10 * 1024 * 1024;

/// HTTP timeouts in seconds
pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Prefix of the per-chat auto-delete job key
pub const AUTO_DELETE_JOB_PREFIX: &str = "auto_delete_";
