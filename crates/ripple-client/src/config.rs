//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so the client runs against the hosted
//! endpoints with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use ripple_shared::constants::{
    DEFAULT_CDN_URL, DEFAULT_ENDPOINT_URL, DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
    DEFAULT_HTTP_TIMEOUT_SECS, TYPING_CLEAR_DELAY_MS,
};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Host serving upload signing, push trigger and media delete.
    /// Env: `RIPPLE_ENDPOINT_URL`
    pub endpoint_url: String,

    /// CDN upload API base.
    /// Env: `RIPPLE_CDN_URL`
    /// Default: `https://api.cloudinary.com/v1_1`
    pub cdn_url: String,

    /// Local cache file. `None` uses the platform data directory.
    /// Env: `RIPPLE_DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Delay after the last keystroke before the typing flag is cleared.
    /// Env: `RIPPLE_TYPING_CLEAR_MS`
    /// Default: 1200 ms
    pub typing_clear_delay: Duration,

    /// Env: `RIPPLE_HTTP_CONNECT_TIMEOUT_SECS`
    pub http_connect_timeout: Duration,

    /// Env: `RIPPLE_HTTP_TIMEOUT_SECS`
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            cdn_url: DEFAULT_CDN_URL.to_string(),
            db_path: None,
            typing_clear_delay: Duration::from_millis(TYPING_CLEAR_DELAY_MS),
            http_connect_timeout: Duration::from_secs(DEFAULT_HTTP_CONNECT_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("RIPPLE_ENDPOINT_URL").filter(|v| !v.trim().is_empty()) {
            config.endpoint_url = url.trim().to_string();
        }

        if let Some(url) = lookup("RIPPLE_CDN_URL").filter(|v| !v.trim().is_empty()) {
            config.cdn_url = url.trim().to_string();
        }

        if let Some(path) = lookup("RIPPLE_DB_PATH").filter(|v| !v.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(ms) = parse_u64(&lookup, "RIPPLE_TYPING_CLEAR_MS") {
            config.typing_clear_delay = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_u64(&lookup, "RIPPLE_HTTP_CONNECT_TIMEOUT_SECS") {
            config.http_connect_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_u64(&lookup, "RIPPLE_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(secs);
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let value = lookup(key)?;
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %value, "Invalid value, using default");
            None
        }
    }
}
