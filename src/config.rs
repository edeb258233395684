//! Client configuration loaded from `cronicle.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! `CRONICLE_URL` and `CRONICLE_API_KEY` take precedence over the file.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CronicleError;
use crate::job::{StatusPolicy, StatusRetry};

pub const DEFAULT_CONFIG_FILE: &str = "cronicle.toml";

/// Settings for talking to one Cronicle server.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Scheduler base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Shared secret sent with every API call.
    #[serde(default)]
    pub api_key: String,

    /// Address the notification listener binds. The port is always ephemeral.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Extra status-fetch attempts when a job starts.
    #[serde(default)]
    pub start_status_retries: u32,

    /// Extra status-fetch attempts when a job completes.
    #[serde(default = "default_complete_status_retries")]
    pub complete_status_retries: u32,

    /// Pause between status-fetch attempts, in milliseconds.
    #[serde(default = "default_status_retry_delay_ms")]
    pub status_retry_delay_ms: u64,

    /// Timeout for each scheduler API call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Timeout for forwarding a notification to an event's own web hook,
    /// in milliseconds.
    #[serde(default = "default_relay_timeout_ms")]
    pub relay_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:3012".to_string()
}

fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}

fn default_complete_status_retries() -> u32 {
    3
}

fn default_status_retry_delay_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_relay_timeout_ms() -> u64 {
    5000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            listen_address: default_listen_address(),
            start_status_retries: 0,
            complete_status_retries: default_complete_status_retries(),
            status_retry_delay_ms: default_status_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            relay_timeout_ms: default_relay_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Loads `path` (or `cronicle.toml` in the working directory) and applies
    /// environment overrides. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CronicleError> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, CronicleError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Applies `CRONICLE_URL` / `CRONICLE_API_KEY` as read by `lookup`.
    /// Empty values are ignored.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("CRONICLE_URL").filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(key) = lookup("CRONICLE_API_KEY").filter(|v| !v.is_empty()) {
            self.api_key = key;
        }
        self
    }

    pub fn listen_ip(&self) -> Result<IpAddr, CronicleError> {
        self.listen_address.parse().map_err(|_| {
            CronicleError::Config(format!("invalid listen_address: {}", self.listen_address))
        })
    }

    pub fn status_policy(&self) -> StatusPolicy {
        let delay = Duration::from_millis(self.status_retry_delay_ms);
        StatusPolicy {
            on_start: StatusRetry::new(self.start_status_retries, delay),
            on_complete: StatusRetry::new(self.complete_status_retries, delay),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}
