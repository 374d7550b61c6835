//! # McpHub MCP Library
//!
//! Connects to MCP servers, discovers their tools and shares the resulting
//! hubs between callers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       ConnectionPool                            │
//! │  HashMap<fingerprint, { hub, ref_count, last_access }>          │
//! │  name_index: server name → fingerprint                          │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │ acquire / release / evict_idle
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          McpHub                                 │
//! │  connections: server → McpConnection                            │
//! │  tools:       "<server>_<tool>" → ToolHandle                    │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │ TransportFactory
//!                              ▼
//!          ┌──────────────────┐  ┌──────────────────┐
//!          │  stdio (child)   │  │  SSE (HTTP)      │
//!          └──────────────────┘  └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcphub_core::Settings;
//! use mcphub_mcp::ConnectionPool;
//!
//! let settings = Settings::parse(r#"{"mcpServers": {"echo": {"command": "echo-server"}}}"#)?;
//! let pool = ConnectionPool::global();
//!
//! let hub = pool.acquire(&settings).await?;
//! let output = hub.invoke_tool("echo_say", serde_json::json!({"text": "hi"})).await?;
//! pool.release(&settings).await;
//!
//! // At process exit
//! let errors = pool.shutdown().await;
//! ```

pub mod connection;
pub mod error;
pub mod hub;
pub mod pool;
pub mod schema;
pub mod tool;
pub mod transport;


pub use connection::{McpClient, McpClientHandler, McpConnection, RmcpConnection};
pub use error::{is_transient_message, HubError, HubResult};
pub use hub::{HubBuilder, McpHub, ServerLookup};
pub use pool::{fingerprint, ConnectionPool, PoolConfig, PoolStats, EMPTY_FINGERPRINT};
pub use schema::{ParameterSchema, SchemaType};
pub use tool::{InvokeOptions, ToolHandle};
pub use transport::{ConnectionFactory, TransportFactory};
