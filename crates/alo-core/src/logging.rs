//! Tracing bootstrap for hosts embedding the sync core
//!
//! Everything goes to one daily-rolling file. The filter is `ALO_LOG` when
//! set, otherwise the configured default. Session tokens never reach the
//! log: URLs that carry one pass through [`redact_token`] first.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "ALO_LOG";

pub const DEFAULT_FILTER: &str = "alo=info,warn";

/// Rolled files are named `alo.log.<date>`.
pub const LOG_FILE_PREFIX: &str = "alo.log";

/// Where logs go and what gets through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub dir: PathBuf,
    pub filter: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl LogOptions {
    /// Filter directives in effect given the value of `ALO_LOG`.
    pub fn directives(&self, env_value: Option<&str>) -> String {
        match env_value.map(str::trim) {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => self.filter.clone(),
        }
    }
}

/// `<data dir>/alo-sync/logs`, or `./alo-sync/logs` without a data dir.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("alo-sync")
        .join("logs")
}

/// Install the global subscriber.
///
/// Fails if the directory cannot be created, the directives do not parse,
/// or a subscriber is already installed.
///
/// ```bash
/// ALO_LOG=alo_net=trace my-chat-app
/// ```
pub fn init(options: &LogOptions) -> Result<()> {
    std::fs::create_dir_all(&options.dir)?;

    let env_value = std::env::var(LOG_ENV).ok();
    let directives = options.directives(env_value.as_deref());
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| Error::config(format!("invalid log filter {directives:?}: {e}")))?;

    let appender = RollingFileAppender::new(Rotation::DAILY, &options.dir, LOG_FILE_PREFIX);
    let file_layer = fmt::layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_timer(fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        ));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::config(format!("logging already initialized: {e}")))?;

    tracing::info!(
        dir = %options.dir.display(),
        filter = %directives,
        "alo-sync logging started"
    );
    Ok(())
}

/// Replace the value of a `token` query parameter so URLs can be logged.
pub fn redact_token(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let redacted: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some(("token", _)) => "token=***".to_string(),
            _ => pair.to_string(),
        })
        .collect();
    format!("{}?{}", base, redacted.join("&"))
}
