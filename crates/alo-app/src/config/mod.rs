//! Configuration file parsing for alo-sync
//!
//! Supports `<config dir>/alo-sync/config.toml` with `ALO_API_URL` /
//! `ALO_WS_URL` environment overrides.

pub mod settings;
pub mod types;

pub use settings::{
    apply_env_overrides, default_config_path, init_config_file, load_settings,
    load_settings_from, API_URL_ENV, WS_URL_ENV,
};
pub use types::*;
