//! Optional TOML settings file.
//!
//! Every field is optional. Resolution order, lowest first:
//! 1. Built-in defaults
//! 2. Settings file (`--config`)
//! 3. Environment variables and CLI flags
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1"
//! keep_alive_secs = 30
//!
//! [source]
//! kind = "follow"
//! max_restarts = 5
//!
//! [broker]
//! max_subscribers = 1
//! capacity_policy = "preempt"
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::broker::{BrokerConfig, CapacityPolicy, DeliveryPolicy};
use crate::source::{FollowConfig, RestartPolicy, SourceKind, StartAt, TailConfig};

/// Errors loading the settings file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Contents of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
}

/// `[server]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    pub bind: Option<IpAddr>,
    pub assets_dir: Option<PathBuf>,
    /// Seconds between SSE keep-alive comments, 0 disables them.
    pub keep_alive_secs: Option<u64>,
    /// Emit the `event: message` field on every SSE frame.
    pub event_name: Option<bool>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
}

/// `[source]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    pub kind: Option<SourceKind>,
    pub tail_bin: Option<PathBuf>,
    pub initial_lines: Option<usize>,
    pub follow_name: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub start_at: Option<StartAt>,
    pub restart: Option<bool>,
    pub max_restarts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub stable_after_secs: Option<u64>,
}

/// `[broker]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSettings {
    pub ingest_capacity: Option<usize>,
    pub subscriber_buffer: Option<usize>,
    pub max_subscribers: Option<usize>,
    pub capacity_policy: Option<CapacityPolicy>,
    /// Switches delivery to eviction after this many milliseconds.
    pub slow_subscriber_timeout_ms: Option<u64>,
}

impl Settings {
    /// Load settings from a TOML file. An empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(content)?)
    }
}

impl SourceSettings {
    pub fn tail_config(&self) -> TailConfig {
        let defaults = TailConfig::default();
        TailConfig {
            program: self.tail_bin.clone().unwrap_or(defaults.program),
            initial_lines: self.initial_lines.unwrap_or(defaults.initial_lines),
            follow_name: self.follow_name.unwrap_or(defaults.follow_name),
        }
    }

    pub fn follow_config(&self) -> FollowConfig {
        let defaults = FollowConfig::default();
        FollowConfig {
            poll_interval: self
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            start_at: self.start_at.unwrap_or(defaults.start_at),
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        let defaults = RestartPolicy::default();
        RestartPolicy {
            enabled: self.restart.unwrap_or(defaults.enabled),
            initial_delay: self
                .initial_delay_ms
                .map_or(defaults.initial_delay, Duration::from_millis),
            max_delay: self
                .max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
            max_restarts: self.max_restarts.or(defaults.max_restarts),
            stable_after: self
                .stable_after_secs
                .map_or(defaults.stable_after, Duration::from_secs),
            ..defaults
        }
    }
}

impl BrokerSettings {
    pub fn broker_config(&self) -> BrokerConfig {
        let mut config = BrokerConfig::default();
        if let Some(capacity) = self.ingest_capacity {
            config = config.with_ingest_capacity(capacity);
        }
        if let Some(buffer) = self.subscriber_buffer {
            config = config.with_subscriber_buffer(buffer);
        }
        if let Some(max) = self.max_subscribers {
            config = config.with_max_subscribers(max, self.capacity_policy.unwrap_or_default());
        }
        if let Some(ms) = self.slow_subscriber_timeout_ms {
            config = config.with_delivery(DeliveryPolicy::Evict {
                timeout: Duration::from_millis(ms),
            });
        }
        config
    }
}
