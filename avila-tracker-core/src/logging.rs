//! Logging for avila-tracker
//!
//! Records always go to a daily-rotated file in the XDG state directory
//! (`~/.local/state/avila-tracker/`). With `tracker.debug` on they are
//! mirrored to stderr, so suppressed sends and delivery failures show up
//! next to command output.
//!
//! Tracker diagnostics are only emitted when `tracker.debug` is set; this
//! module just decides where emitted records go.

use crate::config::{Config, LoggingConfig};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// File name prefix of the rotated log
pub const LOG_FILE_NAME: &str = "avila-tracker.log";

/// Initialize the logging system
///
/// Level comes from `RUST_LOG` when set, otherwise from `[logging] level`.
pub fn init(config: &Config) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    let stderr_layer = config.tracker.debug.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(level_filter(&config.logging))
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!(
        log_file = %Config::log_path().display(),
        level = %config.logging.level,
        stderr = config.tracker.debug,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

fn level_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}
