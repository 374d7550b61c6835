//! STDIO transport for MCP servers
//!
//! Spawns the configured command as a child process and talks MCP over its
//! stdin/stdout. Stderr goes through an OS pipe drained on a blocking thread,
//! one line per tracing event tagged with the server name.

use std::collections::HashMap;
use std::io::BufRead;
use std::process::Stdio;

#[cfg(windows)]
#[allow(unused_imports)] // Trait is used via method call
use std::os::windows::process::CommandExt;

use anyhow::{Context, Result};
use mcphub_core::env::{expand_env_map, expand_env_placeholders};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use tokio::process::Command;
use tracing::{debug, info};

use super::supervise;
use crate::error::{HubError, HubResult};

/// Platform-specific child process isolation.
///
/// Windows: suppress the console window a GUI parent would otherwise
/// allocate for console-subsystem children.
///
/// Unix: put the child in its own process group so terminal signals sent to
/// the parent (SIGINT, SIGTSTP) don't reach MCP servers.
pub fn configure_child_process_platform(cmd: &mut Command) {
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
}

/// Split a command that may carry embedded arguments.
///
/// - `"npx -y @some/server"` with no args → `("npx", ["-y", "@some/server"])`
/// - `"node"` with args `["server.js"]` → `("node", ["server.js"])`
///
/// When separate args are given, the command is taken as the executable.
pub fn parse_command(command: &str, args: &[String]) -> Result<(String, Vec<String>)> {
    if !args.is_empty() {
        return Ok((command.to_string(), args.to_vec()));
    }

    if !command.contains(char::is_whitespace) {
        return Ok((command.to_string(), Vec::new()));
    }

    let mut parts = shell_words::split(command)
        .context("Failed to parse command string - check for unmatched quotes")?
        .into_iter();

    let executable = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty command after parsing"))?;
    Ok((executable, parts.collect()))
}

/// Spawn the server process and return its rmcp transport.
pub(super) fn spawn(
    server: &str,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
) -> HubResult<TokioChildProcess> {
    let command = expand_env_placeholders(command);
    let args: Vec<String> = args.iter().map(|a| expand_env_placeholders(a)).collect();
    let env = expand_env_map(env);

    let (executable, args) =
        parse_command(&command, &args).map_err(|e| HubError::connection(server, "parse command", e))?;

    info!(
        server = %server,
        executable = %executable,
        args = ?args,
        "Spawning stdio MCP server"
    );

    // Reader first: it sees EOF as soon as the child and our write end are gone.
    let (reader, writer) =
        os_pipe::pipe().map_err(|e| HubError::connection(server, "create stderr pipe", e))?;
    drain_stderr(server, reader);

    let cmd = Command::new(&executable).configure(|cmd| {
        cmd.args(&args).envs(&env).kill_on_drop(true);
        configure_child_process_platform(cmd);
    });

    let (transport, _) = TokioChildProcess::builder(cmd)
        .stderr(Stdio::from(writer))
        .spawn()
        .map_err(|e| {
            HubError::connection(
                server,
                "spawn",
                format!("{executable}: {e}. Ensure it's installed and in PATH."),
            )
        })?;

    Ok(transport)
}

/// Log each stderr line until the pipe closes.
fn drain_stderr(server: &str, reader: os_pipe::PipeReader) {
    let tag = server.to_string();
    let worker = tokio::task::spawn_blocking(move || {
        let mut reader = std::io::BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end();
                    if !text.is_empty() {
                        info!(server = %tag, "[stderr] {}", text);
                    }
                }
                Err(e) => {
                    debug!(server = %tag, error = %e, "stderr pipe read failed");
                    break;
                }
            }
        }
        debug!(server = %tag, "stderr pipe closed");
    });
    supervise(server.to_string(), "stderr-drain", worker);
}
