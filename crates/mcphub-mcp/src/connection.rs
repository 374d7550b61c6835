//! Live protocol connections
//!
//! [`McpConnection`] is the seam between the hub and a connected server. The
//! production implementation, [`RmcpConnection`], wraps an rmcp client
//! service; tests substitute scripted connections.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mcphub_core::TransportType;
use rmcp::model::{
    CallToolRequest, CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo,
    ClientRequest, Implementation, JsonObject, LoggingLevel, LoggingMessageNotificationParam,
    PingRequest, ServerResult, Tool,
};
use rmcp::service::{NotificationContext, Peer, RunningService};
use rmcp::{ClientHandler, RoleClient};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Type alias for the MCP client service
pub type McpClient = RunningService<RoleClient, McpClientHandler>;

/// A connected, handshaken MCP server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    fn server_name(&self) -> &str;

    fn transport_type(&self) -> TransportType;

    /// Protocol-level liveness check.
    async fn ping(&self) -> Result<()>;

    /// List every tool, following pagination.
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult>;

    /// Shut the connection down. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Client handler advertising `mcphub-<server>` and forwarding server
/// notifications into tracing.
#[derive(Clone)]
pub struct McpClientHandler {
    info: ClientInfo,
    server_name: String,
}

impl std::fmt::Debug for McpClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClientHandler")
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl McpClientHandler {
    pub fn new(server_name: &str) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("mcphub-{}", server_name),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("McpHub".to_string()),
                    ..Default::default()
                },
                meta: None,
            },
            server_name: server_name.to_string(),
        }
    }

    pub fn client_name(&self) -> &str {
        &self.info.client_info.name
    }
}

impl ClientHandler for McpClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let server = self.server_name.clone();
        async move {
            // Tool sets are fixed once a hub is built
            info!(server = %server, "Server sent tools/list_changed; ignoring until reconnect");
        }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let server = self.server_name.clone();
        async move {
            let message = match &params.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let logger = params.logger.as_deref().unwrap_or("-");

            match params.level {
                LoggingLevel::Debug => debug!(server = %server, logger, "{}", message),
                LoggingLevel::Info | LoggingLevel::Notice => {
                    info!(server = %server, logger, "{}", message)
                }
                LoggingLevel::Warning => warn!(server = %server, logger, "{}", message),
                LoggingLevel::Error
                | LoggingLevel::Critical
                | LoggingLevel::Alert
                | LoggingLevel::Emergency => error!(server = %server, logger, "{}", message),
            }
        }
    }
}

/// [`McpConnection`] backed by a running rmcp client.
pub struct RmcpConnection {
    server_name: String,
    transport_type: TransportType,
    peer: Peer<RoleClient>,
    client: Mutex<Option<McpClient>>,
}

impl RmcpConnection {
    pub fn new(server_name: &str, transport_type: TransportType, client: McpClient) -> Self {
        Self {
            server_name: server_name.to_string(),
            transport_type,
            peer: client.peer().clone(),
            client: Mutex::new(Some(client)),
        }
    }
}

#[async_trait]
impl McpConnection for RmcpConnection {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    async fn ping(&self) -> Result<()> {
        self.peer
            .send_request(ClientRequest::PingRequest(PingRequest::default()))
            .await
            .context("ping failed")?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .context("Failed to list tools")?;
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult> {
        debug!(server = %self.server_name, tool = %name, "Calling tool");

        let request = CallToolRequest::new(CallToolRequestParams {
            name: name.to_string().into(),
            arguments,
            task: None,
            meta: None,
        });
        let response = self
            .peer
            .send_request(ClientRequest::CallToolRequest(request))
            .await
            .context("Tool call failed")?;

        Ok(tool_result_from(&self.server_name, name, response))
    }

    async fn close(&self) -> Result<()> {
        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };

        info!(server = %self.server_name, "Disconnecting from MCP server");
        client
            .cancel()
            .await
            .context("Failed to cancel service")?;
        Ok(())
    }
}

/// Servers that answer a call with `{}` deserialize as [`ServerResult::EmptyResult`];
/// treat that, and any other non-tool result, as a call with no content.
fn tool_result_from(server: &str, tool: &str, response: ServerResult) -> CallToolResult {
    match response {
        ServerResult::CallToolResult(result) => result,
        ServerResult::EmptyResult(_) => CallToolResult::success(Vec::new()),
        other => {
            warn!(server = %server, tool = %tool, response = ?other, "Unexpected response to tool call");
            CallToolResult::success(Vec::new())
        }
    }
}
