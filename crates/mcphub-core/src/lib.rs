//! # McpHub Core Library
//!
//! Settings model and shared infrastructure for McpHub.
//!
//! ## Modules
//!
//! - `settings` - Validated description of the configured MCP servers
//! - `error` - Configuration error taxonomy
//! - `env` - `${VAR}` placeholder expansion for server environments
//! - `logging` - Tracing subscriber bootstrap

pub mod env;
pub mod error;
pub mod logging;
pub mod settings;

pub use error::{SettingsError, SettingsResult};
pub use settings::{
    ServerSpec, Settings, TransportConfig, TransportType, DEFAULT_TIMEOUT, MIN_TIMEOUT,
};
