use anyhow::{Context, Result};
use tracing_appender::{
    non_blocking,
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    prelude::*,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// The directory where the logs are stored.
const LOGS: &str = "./logs";
/// The log file name for the command line driver.
const LOG_FILE: &str = "fhe-bridge.log";
/// Filter used when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info,fhe_bridge_core=info,fhe_bridge_cli=info";

/// Configure logging with JSON formatting to a daily rolling file, and human readable
/// output on stderr. Stdout is left to command results.
///
/// # Errors
///
/// Returns an error if:
/// - Failed to create logs directory
/// - Failed to set global default subscriber
pub fn setup_logging() -> Result<WorkerGuard> {
    std::fs::create_dir_all(LOGS).context("Failed to create logs directory")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, LOGS, LOG_FILE);
    let (file_non_blocking, file_guard) = non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_non_blocking);

    let console_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_writer(std::io::stderr);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to set global default subscriber")?;

    Ok(file_guard)
}
