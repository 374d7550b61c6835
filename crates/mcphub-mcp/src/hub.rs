//! Tool hub
//!
//! An [`McpHub`] owns the live connections for one [`Settings`] value and the
//! tools discovered on them. Construction connects every enabled server and
//! fails as a whole; a hub is never published half-built.
//!
//! ```text
//!  Settings ──► HubBuilder::initialize ──► McpHub { connections, tools }
//!                    │                          │
//!                    ├─ ServerLookup (reuse)    ├─ get_tools / invoke_tool
//!                    └─ ConnectionFactory       └─ close
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use mcphub_core::{ServerSpec, Settings};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::connection::McpConnection;
use crate::error::{HubError, HubResult};
use crate::tool::{InvokeOptions, ToolHandle};
use crate::transport::{ConnectionFactory, TransportFactory};

/// Finds an already-running hub that serves a server name.
///
/// Lets a hub under construction reuse another hub's connection instead of
/// spawning the same server twice.
#[async_trait]
pub trait ServerLookup: Send + Sync {
    async fn acquire_by_server_name(&self, name: &str) -> HubResult<Arc<McpHub>>;
}

struct ServerConnection {
    spec: ServerSpec,
    client: Arc<dyn McpConnection>,
    /// Borrowed connections belong to another hub and are never closed here.
    owned: bool,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<String, ServerConnection>,
    tools: HashMap<String, ToolHandle>,
    closed: bool,
}

pub struct McpHub {
    state: RwLock<HubState>,
    options: InvokeOptions,
}

impl std::fmt::Debug for McpHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHub")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Configures how a hub connects its servers.
pub struct HubBuilder {
    factory: Arc<dyn ConnectionFactory>,
    lookup: Option<Arc<dyn ServerLookup>>,
    options: InvokeOptions,
}

impl HubBuilder {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            lookup: None,
            options: InvokeOptions::default(),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn ServerLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_options(mut self, options: InvokeOptions) -> Self {
        self.options = options;
        self
    }

    /// Connect every enabled server and register its tools.
    ///
    /// Any failure closes the connections this call opened and fails the
    /// whole construction.
    pub async fn initialize(self, settings: &Settings) -> HubResult<McpHub> {
        settings.validate()?;

        let hub = McpHub {
            state: RwLock::new(HubState::default()),
            options: self.options.clone(),
        };

        for (name, spec) in settings.servers() {
            if !spec.is_enabled() {
                info!(server = %name, "Skipping disabled server");
                continue;
            }

            if let Err(e) = hub.connect_server(name, spec, &self).await {
                warn!(server = %name, error = %e, "Hub initialization failed");
                if let Err(close_err) = hub.close().await {
                    warn!(error = %close_err, "Cleanup after failed initialization reported errors");
                }
                return Err(e);
            }
        }

        info!(
            servers = hub.connection_count().await,
            tools = hub.tool_count().await,
            "Hub ready"
        );
        Ok(hub)
    }
}

impl McpHub {
    /// Build a hub with the default rmcp transports and no cross-hub reuse.
    pub async fn connect(settings: &Settings) -> HubResult<Self> {
        HubBuilder::new(Arc::new(TransportFactory::new()))
            .initialize(settings)
            .await
    }

    /// Connect one server and register its tools under the exclusive lock.
    async fn connect_server(
        &self,
        name: &str,
        spec: &ServerSpec,
        builder: &HubBuilder,
    ) -> HubResult<()> {
        let mut state = self.state.write().await;

        if let Some(lookup) = &builder.lookup {
            if let Ok(other) = lookup.acquire_by_server_name(name).await {
                if let Some((client, tools)) = other.shared_connection(name, spec).await {
                    debug!(server = %name, tools = tools.len(), "Reusing connection from another hub");
                    state.connections.insert(
                        name.to_string(),
                        ServerConnection {
                            spec: spec.clone(),
                            client,
                            owned: false,
                        },
                    );
                    for tool in tools {
                        let tool = tool.rebind(spec.timeout, self.options.clone());
                        register(&mut state, tool)?;
                    }
                    return Ok(());
                }
            }
        }

        let client = builder.factory.connect(name, spec).await?;
        state.connections.insert(
            name.to_string(),
            ServerConnection {
                spec: spec.clone(),
                client: client.clone(),
                owned: true,
            },
        );

        let tools = match tokio::time::timeout(spec.timeout, client.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => return Err(HubError::connection(name, "list tools", format!("{e:#}"))),
            Err(_) => {
                return Err(HubError::Timeout {
                    server: name.to_string(),
                    operation: "list tools".to_string(),
                    timeout: spec.timeout,
                })
            }
        };

        for tool in &tools {
            let handle = ToolHandle::new(
                name,
                tool,
                client.clone(),
                spec.timeout,
                self.options.clone(),
            )?;
            register(&mut state, handle)?;
        }

        info!(server = %name, tools = tools.len(), "Registered server tools");
        Ok(())
    }

    /// The live connection and tools for `name`, if this hub opened it and it
    /// reaches the same endpoint as `spec`.
    pub(crate) async fn shared_connection(
        &self,
        name: &str,
        spec: &ServerSpec,
    ) -> Option<(Arc<dyn McpConnection>, Vec<ToolHandle>)> {
        let state = self.state.read().await;
        if state.closed {
            return None;
        }

        let connection = state.connections.get(name)?;
        if !connection.owned {
            // The lender may already have closed it.
            return None;
        }
        if !connection.spec.transport.same_endpoint(&spec.transport) {
            debug!(server = %name, "Server name matches but endpoint differs; not reusing");
            return None;
        }

        let tools = state
            .tools
            .values()
            .filter(|t| t.server() == name)
            .cloned()
            .collect();
        Some((connection.client.clone(), tools))
    }

    /// Every tool when `names` is empty, otherwise exactly the named tools in order.
    pub async fn get_tools<S: AsRef<str>>(&self, names: &[S]) -> HubResult<Vec<ToolHandle>> {
        let state = self.state.read().await;

        if names.is_empty() {
            let mut tools: Vec<ToolHandle> = state.tools.values().cloned().collect();
            tools.sort_by(|a, b| a.key().cmp(b.key()));
            return Ok(tools);
        }

        names
            .iter()
            .map(|name| {
                let key = name.as_ref();
                state
                    .tools
                    .get(key)
                    .cloned()
                    .ok_or_else(|| HubError::ToolNotFound {
                        key: key.to_string(),
                    })
            })
            .collect()
    }

    pub async fn get_tool(&self, key: &str) -> HubResult<ToolHandle> {
        self.state
            .read()
            .await
            .tools
            .get(key)
            .cloned()
            .ok_or_else(|| HubError::ToolNotFound {
                key: key.to_string(),
            })
    }

    /// Invoke a tool by key. The hub lock is not held during the call.
    pub async fn invoke_tool(&self, key: &str, args: Value) -> HubResult<String> {
        let tool = self.get_tool(key).await?;
        tool.invoke(args).await
    }

    /// Check every connection by listing its tools within `timeout`.
    /// A hub without connections is never healthy.
    pub async fn health_check(&self, timeout: Duration) -> HubResult<()> {
        let clients: Vec<Arc<dyn McpConnection>> = {
            let state = self.state.read().await;
            state
                .connections
                .values()
                .map(|c| c.client.clone())
                .collect()
        };

        if clients.is_empty() {
            return Err(HubError::NoConnections);
        }

        let checks = clients.iter().map(|client| async move {
            client
                .list_tools()
                .await
                .map(|_| ())
                .map_err(|e| HubError::Unhealthy {
                    server: client.server_name().to_string(),
                    reason: format!("{e:#}"),
                })
        });

        match tokio::time::timeout(timeout, try_join_all(checks)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HubError::Unhealthy {
                server: clients
                    .iter()
                    .map(|c| c.server_name())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: format!("health check timed out after {timeout:?}"),
            }),
        }
    }

    /// Close owned connections and clear both maps. Every connection is
    /// attempted; failures are aggregated.
    pub async fn close(&self) -> HubResult<()> {
        let connections: Vec<(String, ServerConnection)> = {
            let mut state = self.state.write().await;
            state.closed = true;
            state.tools.clear();
            state.connections.drain().collect()
        };

        let mut failures = Vec::new();
        for (name, connection) in connections {
            if !connection.owned {
                debug!(server = %name, "Leaving borrowed connection open");
                continue;
            }
            if let Err(e) = connection.client.close().await {
                warn!(server = %name, error = %e, "Failed to close connection");
                failures.push(format!("{name}: {e:#}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HubError::Close { failures })
        }
    }

    /// Connected server names, sorted.
    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().await.connections.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn tool_count(&self) -> usize {
        self.state.read().await.tools.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }
}

fn register(state: &mut HubState, tool: ToolHandle) -> HubResult<()> {
    if state.tools.contains_key(tool.key()) {
        return Err(HubError::DuplicateTool {
            key: tool.key().to_string(),
            server: tool.server().to_string(),
            tool: tool.tool_name().to_string(),
        });
    }
    state.tools.insert(tool.key().to_string(), tool);
    Ok(())
}
