//! Logging setup with file rotation.

use crate::server::LoggingSettings;

use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, fmt, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

const LOG_FILE_PREFIX: &str = "plexio-desktop";

/// Setup logging with console and rotating file output.
///
/// # Log Layers
/// - Console: Human-readable, colored output
/// - File: plain text, daily rotation, 7-day retention
///
/// Backend stdout/stderr arrive under the `backend` target.
pub fn setup_logging(
    data_dir: &Path,
    settings: &LoggingSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let logs_dir = logs_dir(data_dir, settings);
    std::fs::create_dir_all(&logs_dir)?;

    // Console layer - human readable for development
    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_ansi(true);

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(7) // Keep 7 days of logs
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)?;

    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_writer(file_appender);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{0},backend={0}", settings.level))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

pub fn logs_dir(data_dir: &Path, settings: &LoggingSettings) -> PathBuf {
    data_dir.join(&settings.directory)
}

/// Get path to current log file (for diagnostics export).
pub fn current_log_path(data_dir: &Path, settings: &LoggingSettings) -> PathBuf {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    logs_dir(data_dir, settings).join(format!("{LOG_FILE_PREFIX}.{today}.log"))
}

/// Last `count` lines of today's log file.
pub fn recent_log_lines(
    data_dir: &Path,
    settings: &LoggingSettings,
    count: usize,
) -> std::io::Result<Vec<String>> {
    let log_path = current_log_path(data_dir, settings);
    if !log_path.exists() {
        return Ok(vec!["No logs available yet.".into()]);
    }

    let content = std::fs::read_to_string(&log_path)?;
    let mut lines: Vec<String> = content.lines().rev().take(count).map(String::from).collect();
    lines.reverse();
    Ok(lines)
}
