//! Structured logging setup
//!
//! Console output only carries warnings and errors, since progress lines are
//! rendered by the front end's event sink. The full log, at the configured
//! level, goes to a daily rotating file in plain or JSON format.

use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::yandere::config::AppConfig;

/// File name prefix of the rotating log.
const LOG_FILE_NAME: &str = "yande_downloader.log";

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builds the level filter, `RUST_LOG` taking precedence over the configured level.
fn file_filter(level: &str) -> LoggerResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => parse_filter(level),
    }
}

fn parse_filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| LoggerError::Filter(e.to_string()))
}

fn file_layer(log_dir: &Path, format: &str, level: &str) -> LoggerResult<(BoxedLayer, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let filter = file_filter(level)?;

    let layer = match format {
        "json" => fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(filter)
            .boxed(),
        _ => fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking)
            .with_filter(filter)
            .boxed(),
    };

    Ok((layer, guard))
}

/// Installs the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init_logger(config: &AppConfig) -> LoggerResult<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    layers.push(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(LevelFilter::WARN)
            .boxed(),
    );

    if config.logging.log_to_file {
        let (layer, file_guard) = file_layer(
            Path::new(&config.paths.log_directory),
            &config.logging.log_format,
            &config.logging.log_level,
        )?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        log_format = %config.logging.log_format,
        log_level = %config.logging.log_level,
        "Logger initialized"
    );

    Ok(guard)
}
