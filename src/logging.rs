//! Tracing subscriber setup for the binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application. `init` builds one from [`LoggingConfig`]:
//!
//! - an `EnvFilter` (`RUST_LOG` wins over the configured filter)
//! - a full or compact `fmt` layer on stderr
//! - an optional non-blocking file layer via `tracing-appender`

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{MlPipeError, Result};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| MlPipeError::Logging(format!("Invalid filter '{}': {}", config.filter, e)))
}

fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let name = path
        .file_name()
        .ok_or_else(|| MlPipeError::Logging(format!("Invalid log file path {:?}", path)))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when a log file is configured; keep it
/// alive until exit or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config)?;

    let (full, compact) = match config.format {
        LogFormat::Full => (Some(fmt::layer()), None),
        LogFormat::Compact => (None, Some(fmt::layer().compact())),
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(full)
        .with(compact)
        .with(file_layer)
        .try_init()
        .map_err(|e| MlPipeError::Logging(e.to_string()))?;

    Ok(guard)
}
