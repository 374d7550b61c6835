//! Server settings model
//!
//! Parses and validates the `mcpServers` document:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "echo": { "command": "npx", "args": ["-y", "@example/echo-server"] },
//!     "search": { "transportType": "sse", "url": "http://localhost:8080/sse", "timeout": 30 }
//!   }
//! }
//! ```
//!
//! Validation is pure: the only I/O is [`Settings::load_from_file`], which
//! reads bytes and delegates to [`Settings::parse`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SettingsError, SettingsResult};

/// Smallest accepted per-server operation timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout applied when a server does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport binding used to reach a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Child process speaking MCP over stdin/stdout
    #[default]
    Stdio,
    /// HTTP Server-Sent-Events stream plus POST endpoint
    Sse,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Sse => "sse",
        }
    }

    /// Resolve the wire `transportType` value. Missing or blank means stdio.
    fn from_wire(server: &str, raw: Option<&str>) -> SettingsResult<Self> {
        let value = raw.map(str::trim).unwrap_or_default();
        if value.is_empty() || value.eq_ignore_ascii_case("stdio") {
            Ok(TransportType::Stdio)
        } else if value.eq_ignore_ascii_case("sse") {
            Ok(TransportType::Sse)
        } else {
            Err(SettingsError::UnsupportedTransport {
                server: server.to_string(),
                transport: value.to_string(),
            })
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-specific connection fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
    },
}

impl TransportConfig {
    pub fn transport_type(&self) -> TransportType {
        match self {
            TransportConfig::Stdio { .. } => TransportType::Stdio,
            TransportConfig::Sse { .. } => TransportType::Sse,
        }
    }

    /// Whether both configs reach the same endpoint (command+args, or URL).
    /// Environment values are not part of the identity.
    pub fn same_endpoint(&self, other: &TransportConfig) -> bool {
        match (self, other) {
            (
                TransportConfig::Stdio { command, args, .. },
                TransportConfig::Stdio {
                    command: other_command,
                    args: other_args,
                    ..
                },
            ) => command == other_command && args == other_args,
            (TransportConfig::Sse { url }, TransportConfig::Sse { url: other_url }) => {
                url == other_url
            }
            _ => false,
        }
    }
}

/// One server's validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub transport: TransportConfig,
    pub disabled: bool,
    pub timeout: Duration,
    pub auto_approve: Vec<String>,
}

impl ServerSpec {
    /// Create an enabled stdio server spec.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(TransportConfig::Stdio {
            command: command.into(),
            args,
            env: HashMap::new(),
        })
    }

    /// Create an enabled SSE server spec.
    pub fn sse(url: impl Into<String>) -> Self {
        Self::with_transport(TransportConfig::Sse { url: url.into() })
    }

    fn with_transport(transport: TransportConfig) -> Self {
        Self {
            transport,
            disabled: false,
            timeout: DEFAULT_TIMEOUT,
            auto_approve: Vec::new(),
        }
    }

    /// Replace the stdio argument list. No effect on SSE specs.
    pub fn with_args(mut self, new_args: Vec<String>) -> Self {
        if let TransportConfig::Stdio { args, .. } = &mut self.transport {
            *args = new_args;
        }
        self
    }

    /// Add an environment variable for the child process. No effect on SSE specs.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auto_approve(mut self, tools: Vec<String>) -> Self {
        self.auto_approve = tools;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport.transport_type()
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Whether calls to `tool` may run without user confirmation.
    pub fn is_auto_approved(&self, tool: &str) -> bool {
        self.auto_approve.iter().any(|t| t == tool)
    }

    /// Check the shape rules. Disabled specs are checked too.
    pub fn validate(&self, server: &str) -> SettingsResult<()> {
        if self.timeout < MIN_TIMEOUT {
            return Err(SettingsError::TimeoutTooShort {
                server: server.to_string(),
                timeout: self.timeout,
                minimum: MIN_TIMEOUT,
            });
        }

        match &self.transport {
            TransportConfig::Stdio { command, .. } if command.trim().is_empty() => {
                Err(SettingsError::MissingCommand {
                    server: server.to_string(),
                })
            }
            TransportConfig::Sse { url } if url.trim().is_empty() => Err(SettingsError::MissingUrl {
                server: server.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn from_wire(server: &str, entry: WireServerEntry) -> SettingsResult<Self> {
        let transport = match TransportType::from_wire(server, entry.transport_type.as_deref())? {
            TransportType::Stdio => TransportConfig::Stdio {
                command: entry.command.unwrap_or_default(),
                args: entry.args,
                env: entry.env,
            },
            TransportType::Sse => TransportConfig::Sse {
                url: entry.url.unwrap_or_default(),
            },
        };

        // A zero timeout is indistinguishable from "not set" in most configs.
        let timeout = match entry.timeout {
            None | Some(0) => DEFAULT_TIMEOUT,
            Some(secs) => Duration::from_secs(secs),
        };

        let spec = Self {
            transport,
            disabled: entry.disabled,
            timeout,
            auto_approve: entry.auto_approve,
        };
        spec.validate(server)?;
        Ok(spec)
    }
}

/// Wire representation of one `mcpServers` entry.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerEntry {
    #[serde(default)]
    transport_type: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    auto_approve: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSettings {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: Option<HashMap<String, WireServerEntry>>,
}

/// Named server specs, keyed by unique server name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    servers: HashMap<String, ServerSpec>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a settings document. Blank input is an empty, valid settings.
    pub fn parse(raw: &str) -> SettingsResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let wire: WireSettings = serde_json::from_str(raw)?;
        let mut entries: Vec<(String, WireServerEntry)> =
            wire.mcp_servers.unwrap_or_default().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut servers = HashMap::with_capacity(entries.len());
        for (name, entry) in entries {
            let spec = ServerSpec::from_wire(&name, entry)?;
            servers.insert(name, spec);
        }

        Ok(Self { servers })
    }

    /// Read a settings file and parse it.
    pub fn load_from_file(path: impl AsRef<Path>) -> SettingsResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw = String::from_utf8(bytes).map_err(|source| SettingsError::Encoding {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn with_server(mut self, name: impl Into<String>, spec: ServerSpec) -> Self {
        self.insert(name, spec);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: ServerSpec) -> Option<ServerSpec> {
        self.servers.insert(name.into(), spec)
    }

    /// Apply the same rules as [`Settings::parse`] to programmatically built settings.
    pub fn validate(&self) -> SettingsResult<()> {
        for (name, spec) in self.servers() {
            spec.validate(name)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServerSpec> {
        self.servers.get(name)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// All servers, sorted by name.
    pub fn servers(&self) -> Vec<(&str, &ServerSpec)> {
        let mut servers: Vec<(&str, &ServerSpec)> = self
            .servers
            .iter()
            .map(|(name, spec)| (name.as_str(), spec))
            .collect();
        servers.sort_by(|a, b| a.0.cmp(b.0));
        servers
    }

    /// Enabled servers, sorted by name.
    pub fn enabled(&self) -> Vec<(&str, &ServerSpec)> {
        self.servers()
            .into_iter()
            .filter(|(_, spec)| spec.is_enabled())
            .collect()
    }
}
