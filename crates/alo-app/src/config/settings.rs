//! Settings loader for `config.toml`

use std::path::{Path, PathBuf};

use alo_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "alo-sync";

/// Overrides `server.api_url`.
pub const API_URL_ENV: &str = "ALO_API_URL";
/// Overrides `server.ws_url`.
pub const WS_URL_ENV: &str = "ALO_WS_URL";

/// `<config dir>/alo-sync/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILENAME))
}

/// Load settings from the default location and apply environment overrides.
pub fn load_settings() -> Settings {
    let mut settings = match default_config_path() {
        Some(path) => load_settings_from(&path),
        None => {
            debug!("No platform config directory, using defaults");
            Settings::default()
        }
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Load settings from `path`.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}

/// Apply `ALO_API_URL` / `ALO_WS_URL` through `lookup`. Empty values are ignored.
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
        debug!("{} overrides api_url", API_URL_ENV);
        settings.server.api_url = url;
    }
    if let Some(url) = lookup(WS_URL_ENV).filter(|v| !v.trim().is_empty()) {
        debug!("{} overrides ws_url", WS_URL_ENV);
        settings.server.ws_url = url;
    }
}

/// Write a commented default config to `path` unless one already exists.
pub fn init_config_file(path: &Path) -> Result<()> {
    if path.exists() {
        debug!("Config file {:?} already exists", path);
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, generate_default_config())
        .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
    info!("Wrote default config to {:?}", path);
    Ok(())
}

fn generate_default_config() -> String {
    r#"# alo-sync configuration

[server]
api_url = "http://localhost:8000"   # REST base (env: ALO_API_URL)
ws_url = "ws://localhost:8000/ws"   # WebSocket endpoint (env: ALO_WS_URL)

[connection]
heartbeat_secs = 10
reconnect_initial_ms = 1000
reconnect_max_ms = 30000
max_reconnect_attempts = 10         # 0 = retry forever
jitter = true
idle_timeout_secs = 30              # 0 = no receive timeout
close_timeout_ms = 2000

[sync]
dedup_capacity = 100
send_timeout_secs = 30              # unacknowledged sends become "failed"
typing_ttl_ms = 3000
notification_limit = 5
notification_ttl_ms = 5000

[logging]
# dir = "/path/to/logs"             # default: platform data dir
filter = "alo=info,warn"            # env: ALO_LOG
"#
    .to_string()
}
