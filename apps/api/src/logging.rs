//! Tracing setup for both binaries.
//!
//! The service writes JSON lines to stdout. Outside production it also keeps
//! daily `app.*.log` and ERROR-only `error.*.log` files under `LOG_DIR`, five of
//! each. `DEBUG=true` forces DEBUG verbosity, and `RUST_LOG`, when set,
//! replaces the level derived from either.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::Config;
use crate::environment::LogLevel;

/// Rotated files kept per log before the oldest is deleted.
const MAX_LOG_FILES: usize = 5;

/// Guards flush the non-blocking file writers on drop; keep them alive for
/// the lifetime of the process.
pub type LogGuards = Vec<WorkerGuard>;

fn level_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter_directive()))
}

fn daily_appender(dir: &Path, prefix: &str) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
}

pub fn init_service_logging(config: &Config) -> LogGuards {
    let mut guards = LogGuards::new();
    let level = config.effective_log_level();

    let (app_layer, error_layer) = if config.environment.is_production() {
        (None, None)
    } else {
        match daily_appender(&config.log_dir, "app")
            .and_then(|app| Ok((app, daily_appender(&config.log_dir, "error")?)))
        {
            Ok((app_file, error_file)) => {
                let (app_writer, app_guard) = tracing_appender::non_blocking(app_file);
                let (error_writer, error_guard) = tracing_appender::non_blocking(error_file);
                guards.push(app_guard);
                guards.push(error_guard);
                (
                    Some(
                        fmt::layer()
                            .json()
                            .with_ansi(false)
                            .with_writer(app_writer)
                            .with_filter(level_filter(level)),
                    ),
                    Some(
                        fmt::layer()
                            .json()
                            .with_ansi(false)
                            .with_writer(error_writer)
                            .with_filter(LevelFilter::ERROR),
                    ),
                )
            }
            Err(err) => {
                eprintln!(
                    "Warning: file logging under {} disabled: {err}",
                    config.log_dir.display()
                );
                (None, None)
            }
        }
    };

    tracing_subscriber::registry()
        .with(app_layer)
        .with(error_layer)
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stdout)
                .with_filter(level_filter(level)),
        )
        .init();

    guards
}

/// Human-readable progress output for `resumify-deploy`.
pub fn init_cli_logging() {
    tracing_subscriber::registry()
        .with(level_filter(LogLevel::Info))
        .with(fmt::layer().with_target(false))
        .init();
}
