//! Fingerprint properties.

use mcphub_core::{ServerSpec, Settings};
use mcphub_mcp::{fingerprint, EMPTY_FINGERPRINT};

#[test]
fn test_parsed_settings_fingerprint_is_stable_across_key_order() {
    let a = Settings::parse(
        r#"{"mcpServers": {
            "one": {"command": "a"},
            "two": {"transportType": "sse", "url": "http://b/sse"},
            "three": {"command": "c", "args": ["x", "y"]}
        }}"#,
    )
    .unwrap();
    let b = Settings::parse(
        r#"{"mcpServers": {
            "three": {"command": "c", "args": ["x", "y"]},
            "one": {"command": "a"},
            "two": {"transportType": "sse", "url": "http://b/sse"}
        }}"#,
    )
    .unwrap();

    for _ in 0..10 {
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}

#[test]
fn test_fingerprint_depends_only_on_enabled_servers() {
    let enabled = Settings::new().with_server("one", ServerSpec::stdio("a", vec![]));
    let with_disabled = enabled
        .clone()
        .with_server("two", ServerSpec::sse("http://b").disabled());
    assert_eq!(fingerprint(&enabled), fingerprint(&with_disabled));

    let with_enabled = enabled
        .clone()
        .with_server("two", ServerSpec::sse("http://b"));
    assert_ne!(fingerprint(&enabled), fingerprint(&with_enabled));
}

#[test]
fn test_fingerprint_distinguishes_name_transport_and_endpoint() {
    let base = Settings::new().with_server("one", ServerSpec::stdio("a", vec![]));
    let renamed = Settings::new().with_server("uno", ServerSpec::stdio("a", vec![]));
    let other_command = Settings::new().with_server("one", ServerSpec::stdio("b", vec![]));
    let sse = Settings::new().with_server("one", ServerSpec::sse("a"));

    let fp = fingerprint(&base);
    assert_ne!(fp, fingerprint(&renamed));
    assert_ne!(fp, fingerprint(&other_command));
    assert_ne!(fp, fingerprint(&sse));
}

#[test]
fn test_argument_boundaries_are_not_ambiguous() {
    let joined = Settings::new().with_server("s", ServerSpec::stdio("run", vec!["a b".into()]));
    let split = Settings::new().with_server(
        "s",
        ServerSpec::stdio("run", vec!["a".into(), "b".into()]),
    );
    assert_ne!(fingerprint(&joined), fingerprint(&split));
}

#[test]
fn test_empty_settings_use_sentinel() {
    assert_eq!(fingerprint(&Settings::parse("").unwrap()), EMPTY_FINGERPRINT);
}
