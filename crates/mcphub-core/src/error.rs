//! Configuration errors.
//!
//! Everything here is detected before any connection attempt and is never
//! retried.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {} is not valid UTF-8: {source}", path.display())]
    Encoding {
        path: PathBuf,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("server '{server}': command is required for stdio transport")]
    MissingCommand { server: String },

    #[error("server '{server}': URL is required for sse transport")]
    MissingUrl { server: String },

    #[error("server '{server}': unsupported transport type '{transport}' (expected 'stdio' or 'sse')")]
    UnsupportedTransport { server: String, transport: String },

    #[error(
        "server '{server}': timeout of {}s is below the minimum of {}s",
        timeout.as_secs(),
        minimum.as_secs()
    )]
    TimeoutTooShort {
        server: String,
        timeout: Duration,
        minimum: Duration,
    },
}

impl SettingsError {
    /// Name of the offending server, when the error is tied to one.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::MissingCommand { server }
            | Self::MissingUrl { server }
            | Self::UnsupportedTransport { server, .. }
            | Self::TimeoutTooShort { server, .. } => Some(server),
            Self::Json(_) | Self::Io { .. } | Self::Encoding { .. } => None,
        }
    }
}
