//! STDIO transport tests
//!
//! Platform process flags, stderr capture and full hub runs against the
//! `mock-mcp-server` binary.

use std::io::BufRead;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use mcphub_core::{ServerSpec, Settings};
use mcphub_mcp::transport::configure_child_process_platform;
use mcphub_mcp::{ConnectionFactory, ConnectionPool, HubError, McpHub, PoolConfig, TransportFactory};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::init_tracing;
use tokio::process::Command;

const MOCK_SERVER: &str = env!("CARGO_BIN_EXE_mock-mcp-server");

fn echo_settings() -> Settings {
    Settings::new().with_server(
        "echo",
        ServerSpec::stdio(MOCK_SERVER, vec![]).with_timeout(Duration::from_secs(30)),
    )
}

/// Verify that `configure_child_process_platform` can be applied to a Command
/// and the resulting process still does stdin -> stdout I/O.
#[tokio::test]
async fn test_platform_flags_preserve_stdio_communication() {
    #[cfg(windows)]
    let mut cmd = Command::new("cmd.exe");
    #[cfg(windows)]
    cmd.args(["/C", "findstr", "."]);

    #[cfg(unix)]
    let mut cmd = Command::new("cat");

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    configure_child_process_platform(&mut cmd);

    let mut child = cmd.spawn().expect("Failed to spawn child process");
    {
        use tokio::io::AsyncWriteExt;
        let stdin = child.stdin.as_mut().expect("stdin not available");
        stdin
            .write_all(b"test message\n")
            .await
            .expect("Failed to write to stdin");
        stdin.shutdown().await.expect("Failed to close stdin");
    }

    let output = child
        .wait_with_output()
        .await
        .expect("Failed to wait for child");
    assert!(output.status.success(), "Child process exited with error");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("test message"), "got: {stdout}");
}

/// Stderr handed to a child as an OS pipe is read line by line on a
/// blocking thread started before the child.
#[cfg(unix)]
#[tokio::test]
async fn test_stderr_pipe_captures_child_output() {
    let (reader, writer) = os_pipe::pipe().expect("Failed to create pipe");

    let reader_handle = tokio::task::spawn_blocking(move || {
        std::io::BufReader::new(reader)
            .lines()
            .map_while(Result::ok)
            .collect::<Vec<String>>()
    });

    let status = tokio::task::spawn_blocking(move || {
        let mut cmd = std::process::Command::new("sh");
        cmd.args(["-c", "echo 'starting up' >&2; echo 'listening on stdio' >&2"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(writer));
        cmd.status().expect("Failed to spawn child process")
    })
    .await
    .expect("spawn_blocking panicked");
    assert!(status.success());

    let lines = reader_handle.await.expect("Reader task panicked");
    assert_eq!(lines, vec!["starting up", "listening on stdio"]);
}

#[tokio::test]
async fn test_hub_over_stdio_server() {
    init_tracing();
    let hub = McpHub::connect(&echo_settings()).await.unwrap();

    let keys: Vec<String> = hub
        .get_tools::<&str>(&[])
        .await
        .unwrap()
        .iter()
        .map(|t| t.key().to_string())
        .collect();
    assert_eq!(
        keys,
        vec!["echo_bounded", "echo_echo", "echo_empty", "echo_env", "echo_fail"]
    );

    let output = hub
        .invoke_tool("echo_echo", json!({"text": "over stdio"}))
        .await
        .unwrap();
    assert_eq!(output, "over stdio");

    match hub.invoke_tool("echo_fail", json!({})).await {
        Err(HubError::ToolFailed { message, .. }) => assert_eq!(message, "boom"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(
        hub.invoke_tool("echo_empty", json!(null)).await,
        Err(HubError::EmptyResult { .. })
    ));

    hub.health_check(Duration::from_secs(5)).await.unwrap();
    hub.close().await.unwrap();
    assert!(hub.is_closed().await);
}

#[tokio::test]
async fn test_numeric_exclusive_bounds_are_tolerated() {
    let hub = McpHub::connect(&echo_settings()).await.unwrap();

    let tool = hub.get_tool("echo_bounded").await.unwrap();
    let ratio = tool
        .parameters()
        .properties
        .get("ratio")
        .expect("ratio property");
    assert!(ratio.schema_type.as_ref().is_some_and(|t| t.includes("number")));
    assert_eq!(ratio.exclusive_minimum, None);
    assert_eq!(ratio.exclusive_maximum, None);

    assert_eq!(
        tool.invoke(json!({"ratio": 0.25})).await.unwrap(),
        "0.25"
    );
    hub.close().await.unwrap();
}

#[tokio::test]
async fn test_env_placeholders_reach_the_child() {
    std::env::set_var("MCPHUB_TEST_STDIO_SECRET", "from-parent");
    let settings = Settings::new().with_server(
        "echo",
        ServerSpec::stdio(MOCK_SERVER, vec![])
            .with_env("MOCK_MCP_VALUE", "value=${MCPHUB_TEST_STDIO_SECRET}"),
    );

    let hub = McpHub::connect(&settings).await.unwrap();
    let output = hub.invoke_tool("echo_env", json!({})).await.unwrap();
    assert_eq!(output, "value=from-parent");
    hub.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_executable_is_a_spawn_error() {
    let spec = ServerSpec::stdio("nonexistent_command_that_does_not_exist_abc123", vec![]);

    match TransportFactory::new().connect("ghost", &spec).await {
        Err(HubError::Connection {
            server, operation, ..
        }) => {
            assert_eq!(server, "ghost");
            assert_eq!(operation, "spawn");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connect should fail"),
    }
}

#[tokio::test]
async fn test_non_mcp_process_fails_handshake() {
    #[cfg(unix)]
    let spec = ServerSpec::stdio("true", vec![]).with_timeout(Duration::from_secs(5));
    #[cfg(windows)]
    let spec = ServerSpec::stdio("cmd.exe", vec!["/C".into(), "exit".into()])
        .with_timeout(Duration::from_secs(5));

    let result = TransportFactory::new().connect("mute", &spec).await;
    assert!(matches!(
        result,
        Err(HubError::Connection { operation: "handshake", .. }) | Err(HubError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_pool_shares_stdio_hub() {
    init_tracing();
    let pool = ConnectionPool::new(
        PoolConfig::default().with_sweep_interval(Duration::from_secs(24 * 3600)),
    );
    let settings = echo_settings();

    let first = pool.acquire(&settings).await.unwrap();
    let second = pool.acquire(&settings).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(pool.ref_count(&settings).await, Some(2));

    assert_eq!(
        second
            .invoke_tool("echo_echo", json!({"text": "pooled"}))
            .await
            .unwrap(),
        "pooled"
    );

    pool.release(&settings).await;
    pool.release(&settings).await;
    let errors = pool.shutdown().await;
    assert!(errors.is_empty(), "{errors:?}");
    assert!(first.is_closed().await);
}
