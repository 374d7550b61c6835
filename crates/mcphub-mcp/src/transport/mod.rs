//! Transport client factory
//!
//! Turns one [`ServerSpec`] into a handshaken [`McpConnection`]: a child
//! process speaking over stdio, or an SSE stream plus POST endpoint.
//!
//! The hub only sees the [`ConnectionFactory`] trait, so tests can hand it
//! scripted connections instead of real servers.

mod sse;
mod stdio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcphub_core::{ServerSpec, TransportConfig};
use rmcp::transport::IntoTransport;
use rmcp::{RoleClient, ServiceExt};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::connection::{McpClient, McpClientHandler, McpConnection, RmcpConnection};
use crate::error::{HubError, HubResult};

pub use sse::{SseClientTransport, SseTransportError};
pub use stdio::{configure_child_process_platform, parse_command};

/// Produces connected clients for the hub.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, server: &str, spec: &ServerSpec) -> HubResult<Arc<dyn McpConnection>>;
}

/// Default factory backed by rmcp.
#[derive(Debug, Clone, Default)]
pub struct TransportFactory {
    http: reqwest::Client,
}

impl TransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client for SSE servers (proxies, TLS roots).
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ConnectionFactory for TransportFactory {
    async fn connect(&self, server: &str, spec: &ServerSpec) -> HubResult<Arc<dyn McpConnection>> {
        spec.validate(server)?;

        let client = match &spec.transport {
            TransportConfig::Stdio { command, args, env } => {
                let transport = stdio::spawn(server, command, args, env)?;
                handshake(server, transport, spec.timeout).await?
            }
            TransportConfig::Sse { url } => {
                let transport =
                    SseClientTransport::connect(server, self.http.clone(), url, spec.timeout)
                        .await
                        .map_err(|e| HubError::connection(server, "open event stream", e))?;
                handshake(server, transport, spec.timeout).await?
            }
        };

        if let Some(peer_info) = client.peer_info() {
            info!(
                server = %server,
                transport = %spec.transport_type(),
                peer = %peer_info.server_info.name,
                protocol = ?peer_info.protocol_version,
                "MCP server connected"
            );
        }

        Ok(Arc::new(RmcpConnection::new(
            server,
            spec.transport_type(),
            client,
        )))
    }
}

/// Run the initialize exchange. Dropping the transport on failure tears the
/// child process or stream down.
async fn handshake<T, E, A>(server: &str, transport: T, timeout: Duration) -> HubResult<McpClient>
where
    T: IntoTransport<RoleClient, E, A>,
    E: std::error::Error + Send + Sync + 'static,
{
    let handler = McpClientHandler::new(server);
    match tokio::time::timeout(timeout, handler.serve(transport)).await {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(e)) => Err(HubError::connection(server, "handshake", e)),
        Err(_) => Err(HubError::Timeout {
            server: server.to_string(),
            operation: "handshake".to_string(),
            timeout,
        }),
    }
}

/// Watch a background worker and log, rather than propagate, a panic.
pub(crate) fn supervise(server: String, worker: &'static str, handle: JoinHandle<()>) {
    tokio::spawn(async move {
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!(server = %server, worker, "Background worker panicked: {}", e);
            }
        }
    });
}
