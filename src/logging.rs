//! Tracing setup for the command line tool.
//!
//! Console diagnostics go to stderr at `warn` (or `debug` with `--verbose`),
//! overridable with `RUST_LOG`. A debug-level log file rolls daily in the log
//! directory when file logging is enabled.

use crate::config::LoggingConfig;
use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Base name of the rolling log files.
const LOG_FILE_PREFIX: &str = "smd.log";

/// Keeps the file writer alive; logs are flushed when it is dropped.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber.
pub fn init(verbose: bool, config: &LoggingConfig, log_dir: &Path) -> io::Result<LogGuard> {
    let default_level = if verbose { "smd=debug" } else { "smd=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(filter);

    let (file_layer, guard) = if config.file_logging {
        fs::create_dir_all(log_dir)?;
        let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(LevelFilter::DEBUG);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LogGuard { _file: guard })
}
