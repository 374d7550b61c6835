//! SSE transport tests against an in-process server.

use std::time::Duration;

use mcphub_core::{ServerSpec, Settings};
use mcphub_mcp::transport::SseClientTransport;
use mcphub_mcp::{ConnectionFactory, HubError, McpHub, TransportFactory};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{init_tracing, SseFixture};

fn sse_settings(url: &str) -> Settings {
    Settings::new().with_server(
        "remote",
        ServerSpec::sse(url).with_timeout(Duration::from_secs(10)),
    )
}

#[tokio::test]
async fn test_endpoint_event_resolves_against_stream_url() {
    let fixture = SseFixture::start().await;

    let transport = SseClientTransport::connect(
        "remote",
        reqwest::Client::new(),
        &fixture.url,
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let endpoint = transport.endpoint();
    assert_eq!(endpoint.path(), "/message");
    assert_eq!(endpoint.query(), Some("sessionId=0"));
    assert!(fixture.url.starts_with(&format!(
        "http://{}",
        endpoint.host_str().unwrap_or_default()
    )));
    assert_eq!(fixture.streams_opened(), 1);
}

#[tokio::test]
async fn test_hub_over_sse_server() {
    init_tracing();
    let fixture = SseFixture::start().await;
    let hub = McpHub::connect(&sse_settings(&fixture.url)).await.unwrap();

    assert_eq!(hub.tool_count().await, 5);
    let output = hub
        .invoke_tool("remote_echo", json!({"text": "over sse"}))
        .await
        .unwrap();
    assert_eq!(output, "over sse");
    assert_eq!(fixture.tool_calls(), 1);

    match hub.invoke_tool("remote_fail", json!({})).await {
        Err(HubError::ToolFailed { message, .. }) => assert_eq!(message, "boom"),
        other => panic!("unexpected result: {other:?}"),
    }

    hub.health_check(Duration::from_secs(5)).await.unwrap();
    hub.close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_events_are_skipped() {
    let fixture = SseFixture::start().await;
    fixture.inject_garbage();

    let hub = McpHub::connect(&sse_settings(&fixture.url)).await.unwrap();
    let output = hub
        .invoke_tool("remote_echo", json!({"text": "still works"}))
        .await
        .unwrap();
    assert_eq!(output, "still works");
    hub.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_stream_route_fails_to_open() {
    let fixture = SseFixture::start().await;
    let url = fixture.url.replace("/sse", "/nowhere");
    let spec = ServerSpec::sse(url).with_timeout(Duration::from_secs(5));

    match TransportFactory::new().connect("remote", &spec).await {
        Err(HubError::Connection { operation, reason, .. }) => {
            assert_eq!(operation, "open event stream");
            assert!(reason.contains("404"), "{reason}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connect should fail"),
    }
}

#[tokio::test]
async fn test_unreachable_server_fails_to_open() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let spec = ServerSpec::sse(format!("http://{addr}/sse")).with_timeout(Duration::from_secs(5));
    let result = TransportFactory::new().connect("remote", &spec).await;
    assert!(matches!(
        result,
        Err(HubError::Connection { operation: "open event stream", .. })
    ));
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let spec = ServerSpec::sse("not a url");
    let result = TransportFactory::new().connect("remote", &spec).await;
    assert!(matches!(result, Err(HubError::Connection { .. })));
}
