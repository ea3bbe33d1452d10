use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;

use crate::error::{ChatError, Result};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SCROLL_THRESHOLD_PX: f64 = 200.0;
pub const DEFAULT_RECONCILE_TOLERANCE: Duration = Duration::from_secs(30);
pub const DEFAULT_ASSISTANT_SENTINEL_ID: &str = "ai-assistant";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Tuning for the chat core
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Number of messages requested per page
    pub page_size: usize,

    /// How often the latest page is refetched while a conversation is open
    pub poll_interval: Duration,

    /// Distance from the bottom, in pixels, past which the user counts as
    /// having scrolled away
    pub scroll_threshold_px: f64,

    /// Maximum distance between an optimistic message's send time and the
    /// server timestamp for the two to be considered the same message
    pub reconcile_tolerance: Duration,

    /// Mention tokens that summon the assistant, matched case-insensitively
    pub mention_tokens: Vec<String>,

    /// Reserved principal id the assistant's messages are attributed to
    pub assistant_sentinel_id: String,

    /// Offset used for day grouping. `None` uses the machine's local zone.
    pub display_offset: Option<FixedOffset>,

    /// Whether to enable detailed logging of merge and reconcile steps
    pub enable_debug_logging: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scroll_threshold_px: DEFAULT_SCROLL_THRESHOLD_PX,
            reconcile_tolerance: DEFAULT_RECONCILE_TOLERANCE,
            mention_tokens: vec!["@ai".to_string(), "@assistant".to_string()],
            assistant_sentinel_id: DEFAULT_ASSISTANT_SENTINEL_ID.to_string(),
            display_offset: None,
            enable_debug_logging: false,
        }
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(ChatError::Configuration(
                "page_size must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ChatError::Configuration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if !self.scroll_threshold_px.is_finite() || self.scroll_threshold_px < 0.0 {
            return Err(ChatError::Configuration(
                "scroll_threshold_px must be a non-negative number".to_string(),
            ));
        }
        if self.assistant_sentinel_id.trim().is_empty() {
            return Err(ChatError::Configuration(
                "assistant_sentinel_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the hosted backend lives and how to reach it
#[derive(Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Reads `CARECHAT_BACKEND_URL`, `CARECHAT_API_KEY` and the optional
    /// `CARECHAT_REQUEST_TIMEOUT_SECS`, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup("CARECHAT_BACKEND_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                ChatError::Configuration("CARECHAT_BACKEND_URL is not set".to_string())
            })?;
        let api_key = lookup("CARECHAT_API_KEY")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ChatError::Configuration("CARECHAT_API_KEY is not set".to_string()))?;

        let mut config = Self::new(base_url, api_key);
        if let Some(raw) = lookup("CARECHAT_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ChatError::Configuration(format!(
                    "CARECHAT_REQUEST_TIMEOUT_SECS is not a number: {}",
                    raw
                ))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Top level configuration for a process embedding the chat core
#[derive(Clone, Debug)]
pub struct CarechatConfig {
    /// Directory for application data
    pub data_dir: PathBuf,

    /// Directory for application logs
    pub logs_dir: PathBuf,

    /// Configuration for the chat core
    pub chat: ChatConfig,
}

impl CarechatConfig {
    pub fn new(data_dir: &Path, logs_dir: &Path) -> Self {
        Self::new_with_chat_config(data_dir, logs_dir, ChatConfig::default())
    }

    pub fn new_with_chat_config(data_dir: &Path, logs_dir: &Path, chat: ChatConfig) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };

        Self {
            data_dir: data_dir.join(env_suffix),
            logs_dir: logs_dir.join(env_suffix),
            chat,
        }
    }
}
