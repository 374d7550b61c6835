//! Hub and pool error taxonomy.

use std::time::Duration;

use mcphub_core::SettingsError;
use thiserror::Error;

pub type HubResult<T> = Result<T, HubError>;

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Connection-class failure: spawn, handshake or tool listing.
    #[error("server '{server}': {operation} failed: {reason}")]
    Connection {
        server: String,
        operation: &'static str,
        reason: String,
    },

    #[error("server '{server}': {operation} timed out after {timeout:?}")]
    Timeout {
        server: String,
        operation: String,
        timeout: Duration,
    },

    #[error("tool '{key}' not found")]
    ToolNotFound { key: String },

    #[error("server '{server}' not found")]
    ServerNotFound { server: String },

    #[error("duplicate tool key '{key}' (server '{server}', tool '{tool}')")]
    DuplicateTool {
        key: String,
        server: String,
        tool: String,
    },

    #[error("server '{server}': tool '{tool}' has an unusable input schema: {reason}")]
    Schema {
        server: String,
        tool: String,
        reason: String,
    },

    #[error("server '{server}' is not responding: {reason}")]
    Unhealthy { server: String, reason: String },

    #[error("tool '{tool}': invalid arguments: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("server '{server}': call to tool '{tool}' failed after {attempts} attempt(s): {reason}")]
    Transport {
        server: String,
        tool: String,
        attempts: u32,
        reason: String,
    },

    #[error("server '{server}': tool '{tool}' returned an error: {message}")]
    ToolFailed {
        server: String,
        tool: String,
        message: String,
    },

    #[error("server '{server}': tool '{tool}' returned no text content")]
    EmptyResult { server: String, tool: String },

    #[error("hub has no live connections")]
    NoConnections,

    #[error("failed to close {} connection(s): {}", failures.len(), failures.join("; "))]
    Close { failures: Vec<String> },
}

impl HubError {
    pub(crate) fn connection(
        server: impl Into<String>,
        operation: &'static str,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Connection {
            server: server.into(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { reason, .. } if is_transient_message(reason))
    }
}

/// Message fragments that identify a dropped or half-closed transport.
const TRANSIENT_PATTERNS: &[&str] = &[
    "transport closed",
    "transport send",
    "broken pipe",
    "file already closed",
    "connection closed",
    "pipe closed",
    "write failed",
    "failed to write",
];

/// Case-insensitive match against known transient transport failures.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}
