//! Logging Infrastructure
//!
//! `RUST_LOG` takes precedence over the configured level. With a log
//! directory the output goes to a daily rolling file instead of stdout.

use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::core::SyncConfig;

/// File name prefix of rolled log files
const LOG_FILE_PREFIX: &str = "sync-engine";

pub type LoggerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

/// Initialize the logger (stdout, `info`)
pub fn init_logger() -> LoggerResult {
    init_logger_with_file(None, false, None)
}

/// Initialize the logger from [`SyncConfig`] (`LOG_LEVEL`, `LOG_JSON`, `LOG_DIR`)
pub fn init_from_config(config: &SyncConfig) -> LoggerResult {
    init_logger_with_file(
        Some(&config.log_level),
        config.log_json,
        config.log_dir.as_deref(),
    )
}

/// Initialize the logger with optional file output
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_logger_with_file(log_level: Option<&str>, json: bool, log_dir: Option<&str>) -> LoggerResult {
    let level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    let appender = log_dir.map(Path::new).filter(|p| p.exists()).map(|dir| {
        tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX)
    });

    match (appender, json) {
        (Some(file), true) => builder.json().with_writer(file).try_init(),
        (Some(file), false) => builder.with_ansi(false).with_writer(file).try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    }
}
