//! Configuration for the tracker session and its remote collaborators.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{TrackerError, TrackerResult};
use crate::scheduler::PollCadence;

/// Environment variable holding the webhook that serves chats and messages.
pub const WEBHOOK_URL_ENV: &str = "CHAT_TRACKER_WEBHOOK_URL";
/// Environment variable holding the chat-status service base URL.
pub const STATUS_URL_ENV: &str = "CHAT_TRACKER_STATUS_URL";
/// Environment variable holding the opaque bearer token.
pub const TOKEN_ENV: &str = "CHAT_TRACKER_TOKEN";
/// Environment variable holding the local cache database path.
pub const CACHE_PATH_ENV: &str = "CHAT_TRACKER_CACHE_PATH";
/// Environment variable holding an optional transport timeout in seconds.
pub const TIMEOUT_ENV: &str = "CHAT_TRACKER_TIMEOUT_SECS";

/// Default chat-status service location.
const DEFAULT_STATUS_URL: &str = "http://localhost:4000";
/// Default local cache file.
const DEFAULT_CACHE_PATH: &str = "chat_tracker.sqlite3";

/// Configuration for a tracker session.
#[derive(Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Webhook used for chat summaries, message history, sends and toggle notifications.
    pub webhook_url: String,
    /// Base URL of the chat-status service (`/chat-status` is appended).
    pub status_api_base: String,
    /// Bearer token attached to remote calls. Never serialized.
    #[serde(skip_serializing, default)]
    pub auth_token: Option<String>,
    /// Path of the `SQLite` file backing the local cache slots.
    pub cache_path: PathBuf,
    /// Optional transport timeout. `None` lets a stalled call hold its loop.
    pub request_timeout_secs: Option<u64>,
    /// Poll cadence tiers.
    pub cadence: PollCadence,
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("webhook_url", &self.webhook_url)
            .field("status_api_base", &self.status_api_base)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("cache_path", &self.cache_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("cadence", &self.cadence)
            .finish()
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            status_api_base: DEFAULT_STATUS_URL.to_string(),
            auth_token: None,
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            request_timeout_secs: None,
            cadence: PollCadence::default(),
        }
    }
}

impl TrackerConfig {
    /// Create a config pointing at the given webhook.
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            ..Self::default()
        }
    }

    /// Build the config from `CHAT_TRACKER_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if the webhook URL is missing or any value is invalid.
    pub fn from_env() -> TrackerResult<Self> {
        let webhook_url = std::env::var(WEBHOOK_URL_ENV)
            .map_err(|_| TrackerError::Config(format!("{WEBHOOK_URL_ENV} is not set")))?;

        let mut config = Self::new(webhook_url);
        if let Ok(status) = std::env::var(STATUS_URL_ENV) {
            config.status_api_base = status;
        }
        config.auth_token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        if let Ok(path) = std::env::var(CACHE_PATH_ENV) {
            config.cache_path = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            let secs = raw
                .parse::<u64>()
                .map_err(|e| TrackerError::Config(format!("{TIMEOUT_ENV}: {e}")))?;
            config.request_timeout_secs = Some(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the chat-status service base URL.
    #[must_use]
    pub fn with_status_api(mut self, base: impl Into<String>) -> Self {
        self.status_api_base = base.into();
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the local cache path.
    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    /// Transport timeout, if any.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if a URL does not parse or the cadence is inconsistent.
    pub fn validate(&self) -> TrackerResult<()> {
        if self.webhook_url.trim().is_empty() {
            return Err(TrackerError::Config("webhook_url must be set".to_string()));
        }
        Url::parse(&self.webhook_url)?;
        Url::parse(&self.status_api_base)?;

        if self.request_timeout_secs == Some(0) {
            return Err(TrackerError::Config(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }

        self.cadence.validate()
    }
}

/// Serde module for `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
