//! Shared test utilities and fixtures for McpHub integration tests.

use std::sync::Arc;

use mcphub_core::{ServerSpec, Settings};
use mcphub_mcp::{ConnectionPool, HubBuilder, InvokeOptions, McpHub, PoolConfig};
use rmcp::model::Tool;
use std::time::Duration;

pub use mocks::{MockConnection, MockConnectionFactory};


pub use sse_fixture::SseFixture;

/// Install a test-writer tracing subscriber once per test binary.
pub fn init_tracing() {
    mcphub_core::logging::init_test_tracing();
}

/// A tool taking a single optional `text` string.
pub fn text_tool(name: &str) -> Tool {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {"text": {"type": "string"}}
    });
    Tool::new(
        name.to_string(),
        format!("{name} tool"),
        Arc::new(schema.as_object().cloned().unwrap_or_default()),
    )
}

/// Invoke options with a short retry delay so tests stay fast.
pub fn fast_invoke_options() -> InvokeOptions {
    InvokeOptions::default()
        .with_ping_timeout(Duration::from_secs(1))
        .with_retry_delay(Duration::from_millis(20))
}

/// Settings with stdio servers `alpha` and `beta` plus a disabled `gamma`.
pub fn two_server_settings() -> Settings {
    Settings::new()
        .with_server("alpha", ServerSpec::stdio("alpha-server", vec![]))
        .with_server("beta", ServerSpec::stdio("beta-server", vec!["--verbose".into()]))
        .with_server("gamma", ServerSpec::stdio("gamma-server", vec![]).disabled())
}

/// Build a hub over mock connections.
pub async fn mock_hub(
    factory: &Arc<MockConnectionFactory>,
    settings: &Settings,
) -> mcphub_mcp::HubResult<McpHub> {
    HubBuilder::new(factory.clone())
        .with_options(fast_invoke_options())
        .initialize(settings)
        .await
}

/// An isolated pool over mock connections. The sweep interval is long so
/// tests drive eviction explicitly.
pub fn mock_pool(factory: &Arc<MockConnectionFactory>, idle_timeout: Duration) -> ConnectionPool {
    ConnectionPool::with_factory(
        PoolConfig::default()
            .with_idle_timeout(idle_timeout)
            .with_sweep_interval(Duration::from_secs(24 * 3600))
            .with_health_timeout(Duration::from_secs(1))
            .with_invoke_options(fast_invoke_options()),
        factory.clone(),
    )
}
