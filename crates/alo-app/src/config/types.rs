//! Configuration types for alo-sync
//!
//! Defines:
//! - `Settings` - the `config.toml` root
//! - `ServerSettings`, `ConnectionConfig`, `SyncSettings`, `LoggingSettings` - its sections

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use alo_core::logging::{default_log_dir, LogOptions, DEFAULT_FILTER};
use alo_net::{ConnectionSettings, ReconnectPolicy};

/// Application settings (`config.toml`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Runtime settings for the connection manager.
    pub fn connection_settings(&self) -> ConnectionSettings {
        self.connection.to_runtime(&self.server.ws_url)
    }

    /// Options for [`alo_core::logging::init`].
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            dir: self.logging.dir.clone().unwrap_or_else(default_log_dir),
            filter: self.logging.filter.clone(),
        }
    }
}

/// Backend endpoints
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSettings {
    /// REST base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// WebSocket endpoint (token is appended as a query parameter)
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

/// Link timing and reconnect policy (`[connection]`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// 0 = retry forever
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_true")]
    pub jitter: bool,

    /// 0 disables the receive timeout
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            jitter: true,
            idle_timeout_secs: default_idle_timeout_secs(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let initial = Duration::from_millis(self.reconnect_initial_ms.max(1));
        ReconnectPolicy {
            initial,
            max: Duration::from_millis(self.reconnect_max_ms).max(initial),
            max_attempts: self.max_reconnect_attempts,
            jitter: self.jitter,
        }
    }

    pub fn to_runtime(&self, ws_url: &str) -> ConnectionSettings {
        ConnectionSettings {
            ws_url: ws_url.to_string(),
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            reconnect: self.reconnect_policy(),
        }
    }
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_reconnect_initial_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_close_timeout_ms() -> u64 {
    2000
}

/// Store, reconciler, and notification tuning (`[sync]`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Recently seen message ids remembered for duplicate detection
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Seconds before an unacknowledged send is marked failed
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    #[serde(default = "default_typing_ttl_ms")]
    pub typing_ttl_ms: u64,

    /// Notifications kept in the in-memory center
    #[serde(default = "default_notification_limit")]
    pub notification_limit: usize,

    #[serde(default = "default_notification_ttl_ms")]
    pub notification_ttl_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
            send_timeout_secs: default_send_timeout_secs(),
            typing_ttl_ms: default_typing_ttl_ms(),
            notification_limit: default_notification_limit(),
            notification_ttl_ms: default_notification_ttl_ms(),
        }
    }
}

impl SyncSettings {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn typing_ttl(&self) -> Duration {
        Duration::from_millis(self.typing_ttl_ms)
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_millis(self.notification_ttl_ms)
    }
}

/// Log file location and filter (`[logging]`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Defaults to the platform data dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// `tracing` directives; `ALO_LOG` wins when set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: None,
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    DEFAULT_FILTER.to_string()
}

fn default_dedup_capacity() -> usize {
    100
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_typing_ttl_ms() -> u64 {
    3000
}

fn default_notification_limit() -> usize {
    5
}

fn default_notification_ttl_ms() -> u64 {
    5000
}
