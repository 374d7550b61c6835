//! Tracing subscriber bootstrap.
//!
//! Console output is compact and colored. When a log directory is configured a
//! second, more detailed layer writes daily rotated files through a
//! non-blocking appender; the returned guard must stay alive for the program's
//! lifetime or buffered lines are lost.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives applied when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,mcphub_core=debug,mcphub_mcp=debug,rmcp=warn";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("failed to create log directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create log file appender: {0}")]
    Appender(#[from] InitError),

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Directory for rotated log files. `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            log_dir: None,
            file_prefix: "mcphub".to_string(),
        }
    }
}

impl LogConfig {
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Install the global subscriber.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    // RUST_LOG takes precedence
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_filter)?,
    };

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let Some(logs_dir) = &config.log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()?;
        return Ok(None);
    };

    std::fs::create_dir_all(logs_dir).map_err(|source| LoggingError::Directory {
        path: logs_dir.clone(),
        source,
    })?;

    // Creates files like: mcphub.2026-01-22.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .build(logs_dir)?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(Some(guard))
}

/// Route tracing output through the libtest capture. Safe to call from every test.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
