//! Construction, lookup and close.

use std::time::Duration;

use mcphub_core::{ServerSpec, Settings};
use mcphub_mcp::HubError;
use pretty_assertions::assert_eq;
use tests::{init_tracing, mock_hub, text_tool, two_server_settings, MockConnectionFactory};

#[tokio::test]
async fn test_disabled_servers_are_never_contacted() {
    init_tracing();
    let factory = MockConnectionFactory::new();
    let hub = mock_hub(&factory, &two_server_settings()).await.unwrap();

    assert_eq!(hub.server_names().await, vec!["alpha", "beta"]);
    assert_eq!(factory.connects("gamma"), 0);
    assert!(matches!(
        hub.get_tool("gamma_say").await,
        Err(HubError::ToolNotFound { .. })
    ));
}

#[tokio::test]
async fn test_get_tools_with_empty_list_returns_all() {
    let factory = MockConnectionFactory::new()
        .with_tools("alpha", vec![text_tool("read"), text_tool("write")])
        .with_tools("beta", vec![text_tool("search")]);
    let hub = mock_hub(&factory, &two_server_settings()).await.unwrap();

    let keys: Vec<String> = hub
        .get_tools::<&str>(&[])
        .await
        .unwrap()
        .iter()
        .map(|t| t.key().to_string())
        .collect();
    assert_eq!(keys, vec!["alpha_read", "alpha_write", "beta_search"]);
}

#[tokio::test]
async fn test_get_tools_preserves_requested_order() {
    let factory = MockConnectionFactory::new()
        .with_tools("alpha", vec![text_tool("read"), text_tool("write")])
        .with_tools("beta", vec![text_tool("search")]);
    let hub = mock_hub(&factory, &two_server_settings()).await.unwrap();

    let tools = hub
        .get_tools(&["beta_search", "alpha_read"])
        .await
        .unwrap();
    let keys: Vec<&str> = tools.iter().map(|t| t.key()).collect();
    assert_eq!(keys, vec!["beta_search", "alpha_read"]);

    let tool = &tools[0];
    assert_eq!(tool.server(), "beta");
    assert_eq!(tool.tool_name(), "search");
    assert_eq!(tool.description(), "search tool");
}

#[tokio::test]
async fn test_get_tools_fails_on_any_unknown_name() {
    let factory = MockConnectionFactory::new();
    let hub = mock_hub(&factory, &two_server_settings()).await.unwrap();

    let err = hub
        .get_tools(&["alpha_say", "alpha_missing"])
        .await
        .unwrap_err();
    match err {
        HubError::ToolNotFound { key } => assert_eq!(key, "alpha_missing"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_settings_give_empty_hub() {
    let factory = MockConnectionFactory::new();
    let hub = mock_hub(&factory, &Settings::new()).await.unwrap();

    assert!(hub.get_tools::<&str>(&[]).await.unwrap().is_empty());
    assert!(matches!(
        hub.get_tool("anything").await,
        Err(HubError::ToolNotFound { .. })
    ));
    assert!(matches!(
        hub.health_check(Duration::from_secs(1)).await,
        Err(HubError::NoConnections)
    ));
    assert_eq!(factory.total_connects(), 0);
}

#[tokio::test]
async fn test_failed_server_closes_already_connected_ones() {
    init_tracing();
    let factory = MockConnectionFactory::new();
    factory.fail_server("beta");

    let err = mock_hub(&factory, &two_server_settings()).await.unwrap_err();
    match err {
        HubError::Connection {
            server, operation, ..
        } => {
            assert_eq!(server, "beta");
            assert_eq!(operation, "handshake");
        }
        other => panic!("unexpected error: {other}"),
    }

    let alpha = factory.latest("alpha").unwrap();
    assert_eq!(alpha.closes(), 1);
}

#[tokio::test]
async fn test_invalid_settings_fail_before_connecting() {
    let factory = MockConnectionFactory::new();
    let settings = Settings::new()
        .with_server("ok", ServerSpec::stdio("ok-server", vec![]))
        .with_server("broken", ServerSpec::sse(" "));

    let err = mock_hub(&factory, &settings).await.unwrap_err();
    assert!(matches!(err, HubError::Settings(_)));
    assert_eq!(factory.total_connects(), 0);
}

#[tokio::test]
async fn test_close_closes_every_connection_and_clears_tools() {
    let factory = MockConnectionFactory::new();
    let hub = mock_hub(&factory, &two_server_settings()).await.unwrap();

    hub.close().await.unwrap();

    assert!(hub.is_closed().await);
    assert_eq!(hub.tool_count().await, 0);
    assert_eq!(hub.connection_count().await, 0);
    for conn in factory.created() {
        assert_eq!(conn.closes(), 1, "{}", conn.name());
    }
}

#[tokio::test]
async fn test_close_aggregates_failures_and_attempts_all() {
    let factory = MockConnectionFactory::new();
    let hub = mock_hub(&factory, &two_server_settings()).await.unwrap();
    factory.latest("alpha").unwrap().set_close_fails(true);

    let err = hub.close().await.unwrap_err();
    match err {
        HubError::Close { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("alpha:"), "{failures:?}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(factory.latest("beta").unwrap().closes(), 1);
}

#[tokio::test]
async fn test_health_check_covers_every_connection() {
    let factory = MockConnectionFactory::new();
    let hub = mock_hub(&factory, &two_server_settings()).await.unwrap();

    hub.health_check(Duration::from_secs(1)).await.unwrap();

    factory.latest("beta").unwrap().set_list_fails(true);
    match hub.health_check(Duration::from_secs(1)).await {
        Err(HubError::Unhealthy { server, .. }) => assert_eq!(server, "beta"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_function_definitions_expose_key_and_schema() {
    let factory = MockConnectionFactory::new();
    let hub = mock_hub(&factory, &two_server_settings()).await.unwrap();

    let definition = hub.get_tool("alpha_say").await.unwrap().to_function_definition();
    let function = &definition["function"];
    assert_eq!(definition["type"], "function");
    assert_eq!(function["name"], "alpha_say");
    assert_eq!(function["parameters"]["type"], "object");
    assert_eq!(function["parameters"]["properties"]["text"]["type"], "string");
}
