//! Invokable tool handles
//!
//! A [`ToolHandle`] is bound to the connection that advertised the tool. Each
//! invocation pings the server first, then makes the call, retrying exactly
//! once after [`InvokeOptions::retry_delay`] when the failure looks like a
//! dropped transport.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{CallToolResult, JsonObject, Tool};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::connection::McpConnection;
use crate::error::{is_transient_message, HubError, HubResult};
use crate::schema::{tool_key, ParameterSchema};

/// Timeouts and retry pacing for tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Bound on the liveness ping sent before every call.
    pub ping_timeout: Duration,
    /// Pause before the single retry of a transient failure.
    pub retry_delay: Duration,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(3),
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl InvokeOptions {
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[derive(Clone)]
pub struct ToolHandle {
    key: String,
    server: String,
    tool_name: String,
    description: String,
    parameters: ParameterSchema,
    connection: Arc<dyn McpConnection>,
    call_timeout: Duration,
    options: InvokeOptions,
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("key", &self.key)
            .field("server", &self.server)
            .field("tool_name", &self.tool_name)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl ToolHandle {
    pub(crate) fn new(
        server: &str,
        tool: &Tool,
        connection: Arc<dyn McpConnection>,
        call_timeout: Duration,
        options: InvokeOptions,
    ) -> HubResult<Self> {
        let parameters =
            ParameterSchema::from_input_schema(&tool.input_schema).map_err(|e| HubError::Schema {
                server: server.to_string(),
                tool: tool.name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            key: tool_key(server, &tool.name),
            server: server.to_string(),
            tool_name: tool.name.to_string(),
            description: tool.description.as_deref().unwrap_or_default().to_string(),
            parameters,
            connection,
            call_timeout,
            options,
        })
    }

    /// Same tool and connection, with this hub's timeout and options.
    pub(crate) fn rebind(&self, call_timeout: Duration, options: InvokeOptions) -> Self {
        Self {
            call_timeout,
            options,
            ..self.clone()
        }
    }

    /// Composite `<server>_<tool>` key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &ParameterSchema {
        &self.parameters
    }

    /// `{"type": "function", "function": {name, description, parameters}}`
    pub fn to_function_definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.key,
                "description": self.description,
                "parameters": self.parameters.to_value(),
            }
        })
    }

    /// Invoke with JSON-encoded arguments. Blank input means no arguments.
    pub async fn invoke_json(&self, args: &str) -> HubResult<String> {
        let value = if args.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(args).map_err(|e| HubError::InvalidArguments {
                tool: self.key.clone(),
                reason: e.to_string(),
            })?
        };
        self.invoke(value).await
    }

    /// Invoke with an argument object (or `null`) and return the text output.
    pub async fn invoke(&self, args: Value) -> HubResult<String> {
        let arguments: Option<JsonObject> = match args {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                return Err(HubError::InvalidArguments {
                    tool: self.key.clone(),
                    reason: format!("expected a JSON object, got {other}"),
                })
            }
        };

        self.ping().await?;

        debug!(server = %self.server, tool = %self.tool_name, "Invoking tool");
        let result = self.call_with_retry(arguments).await?;
        self.text_output(result)
    }

    async fn ping(&self) -> HubResult<()> {
        match tokio::time::timeout(self.options.ping_timeout, self.connection.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HubError::Unhealthy {
                server: self.server.clone(),
                reason: format!("{e:#}"),
            }),
            Err(_) => Err(HubError::Unhealthy {
                server: self.server.clone(),
                reason: format!("ping timed out after {:?}", self.options.ping_timeout),
            }),
        }
    }

    async fn call_with_retry(&self, arguments: Option<JsonObject>) -> HubResult<CallToolResult> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let call = self.connection.call_tool(&self.tool_name, arguments.clone());
            let reason = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => {
                    return Err(HubError::Timeout {
                        server: self.server.clone(),
                        operation: format!("call to tool '{}'", self.tool_name),
                        timeout: self.call_timeout,
                    })
                }
            };

            if attempts == 1 && is_transient_message(&reason) {
                warn!(
                    server = %self.server,
                    tool = %self.tool_name,
                    error = %reason,
                    "Transient transport error, retrying once"
                );
                tokio::time::sleep(self.options.retry_delay).await;
                continue;
            }

            return Err(HubError::Transport {
                server: self.server.clone(),
                tool: self.tool_name.clone(),
                attempts,
                reason,
            });
        }
    }

    fn text_output(&self, result: CallToolResult) -> HubResult<String> {
        let text = result
            .content
            .iter()
            .filter_map(|c| c.raw.as_text().map(|t| t.text.as_str()))
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error.unwrap_or(false) {
            return Err(HubError::ToolFailed {
                server: self.server.clone(),
                tool: self.tool_name.clone(),
                message: if text.is_empty() {
                    "tool reported an error without a message".to_string()
                } else {
                    text
                },
            });
        }

        if text.is_empty() {
            return Err(HubError::EmptyResult {
                server: self.server.clone(),
                tool: self.tool_name.clone(),
            });
        }

        Ok(text)
    }
}
