use std::path::PathBuf;
use std::time::Duration;

use chatbridge::config::{Config, ConnectConfig};
use chatbridge::dispatch::Delivery;
use chatbridge::error::BridgeError;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

#[test]
fn empty_file_gives_defaults() {
    let config = assert_ok!(Config::from_toml_str(""));

    assert!(config.connect.url.is_none());
    assert_eq!(config.connect.method, "POST");
    assert_eq!(config.connect.delivery(), Delivery::Immediate);
    assert_eq!(config.connect.stream_interval(), Duration::from_millis(6));
    assert!(config.connect.max_poll_attempts.is_none());

    let intro = &config.web_model.intro_message;
    assert!(intro.displayed);
    assert!(intro.auto_scroll);
    assert!(!intro.remove_after_load);
    assert!(!config.web_model.load.on_init);
    assert_eq!(config.cache.dir, PathBuf::from(".chatbridge/cache"));
}

#[test]
fn parses_all_sections() {
    let text = r#"
        [connect]
        url = "https://chat.example.com/v1/reply"
        method = "PUT"
        api_key = "sk-live-123"
        stream = true
        stream_interval_ms = 20
        max_poll_attempts = 30

        [connect.headers]
        X-Team = "search"

        [web_model]
        model = "RedPajama-INCITE-Chat-3B-v1-q4f32_1"
        worker = "llm-worker.js"

        [web_model.urls]
        wasm = "https://mirror.test/redpajama.wasm"

        [web_model.load]
        on_message = true
        skip_cache = true

        [web_model.intro_message]
        displayed = false
        remove_after_message = true

        [cache]
        dir = "/var/cache/chatbridge"
    "#;

    let config = assert_ok!(Config::from_toml_str(text));

    assert_eq!(config.connect.url.as_deref(), Some("https://chat.example.com/v1/reply"));
    assert_eq!(config.connect.method, "PUT");
    assert_eq!(config.connect.delivery(), Delivery::Stream);
    assert_eq!(config.connect.stream_interval(), Duration::from_millis(20));
    assert_eq!(config.connect.max_poll_attempts, Some(30));
    assert_eq!(config.connect.headers["X-Team"], "search");

    let web = &config.web_model;
    assert_eq!(web.model.as_deref(), Some("RedPajama-INCITE-Chat-3B-v1-q4f32_1"));
    assert_eq!(web.worker.as_deref(), Some("llm-worker.js"));
    assert!(web.urls.model.is_none());
    assert_eq!(web.urls.wasm.as_deref(), Some("https://mirror.test/redpajama.wasm"));
    assert!(web.load.on_message);
    assert!(web.load.skip_cache);
    assert!(!web.load.clear_cache);
    assert!(!web.intro_message.displayed);
    assert!(web.intro_message.auto_scroll);
    assert!(web.intro_message.remove_after_message);

    assert_eq!(config.cache.dir, PathBuf::from("/var/cache/chatbridge"));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = assert_err!(Config::from_toml_str("[connect]\nstream = \"sometimes\""));
    assert!(matches!(err, BridgeError::SchemaParse(_)));
}

#[test]
fn missing_file_is_an_error() {
    let path = std::env::temp_dir().join("chatbridge-no-such-config.toml");
    let err = assert_err!(Config::from_path(&path));
    assert!(err.to_string().contains("cannot read"));
}

#[test]
fn reads_config_from_disk() {
    let path = std::env::temp_dir().join(format!("chatbridge-config-{}.toml", std::process::id()));
    std::fs::write(&path, "[connect]\nurl = \"http://localhost:9000\"\n").unwrap();

    let config = Config::from_path(&path).unwrap();
    assert_eq!(config.connect.url.as_deref(), Some("http://localhost:9000"));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn api_key_becomes_bearer_header() {
    let connect = ConnectConfig {
        api_key: Some("sk-abc".to_string()),
        ..ConnectConfig::default()
    };

    let headers = connect.effective_headers();
    assert_eq!(headers["Authorization"], "Bearer sk-abc");
}

#[test]
fn explicit_authorization_header_wins() {
    let mut connect = ConnectConfig {
        api_key: Some("sk-abc".to_string()),
        ..ConnectConfig::default()
    };
    connect
        .headers
        .insert("authorization".to_string(), "Token custom".to_string());

    let headers = connect.effective_headers();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers["authorization"], "Token custom");
}

#[test]
fn debug_output_redacts_secrets() {
    let mut connect = ConnectConfig {
        url: Some("https://chat.example.com".to_string()),
        api_key: Some("sk-very-secret".to_string()),
        ..ConnectConfig::default()
    };
    connect
        .headers
        .insert("X-Api-Key".to_string(), "hdr-very-secret".to_string());

    let debug = format!("{connect:?}");
    assert!(!debug.contains("sk-very-secret"));
    assert!(!debug.contains("hdr-very-secret"));
    assert!(debug.contains("https://chat.example.com"));
}

#[test]
fn request_context_requires_url() {
    let err = ConnectConfig::default()
        .request_context(json!({"messages": []}))
        .unwrap_err();
    assert!(err.to_string().contains("connect.url"));
}

#[test]
fn request_context_carries_method_headers_and_body() {
    let connect = ConnectConfig {
        url: Some("https://chat.example.com".to_string()),
        method: "PATCH".to_string(),
        api_key: Some("sk-abc".to_string()),
        ..ConnectConfig::default()
    };

    let outgoing = connect
        .request_context(json!({"messages": [{"role": "user", "text": "hi"}]}))
        .unwrap()
        .into_outgoing()
        .unwrap();

    assert_eq!(outgoing.url, "https://chat.example.com");
    assert_eq!(outgoing.method, "PATCH");
    assert_eq!(outgoing.headers["Authorization"], "Bearer sk-abc");
    assert_eq!(outgoing.headers["Content-Type"], "application/json");
    assert_eq!(
        outgoing.body_json(),
        Some(json!({"messages": [{"role": "user", "text": "hi"}]}))
    );
}

#[test]
fn verify_request_sends_the_typed_key() {
    let mut connect = ConnectConfig {
        url: Some("https://chat.example.com/v1/keys".to_string()),
        method: "GET".to_string(),
        api_key: Some("sk-configured".to_string()),
        ..ConnectConfig::default()
    };
    connect
        .headers
        .insert("authorization".to_string(), "Token custom".to_string());
    connect
        .headers
        .insert("X-Team".to_string(), "search".to_string());

    let request = assert_ok!(connect.verify_request("sk-typed"));

    assert_eq!(request.url, "https://chat.example.com/v1/keys");
    assert_eq!(request.method, "GET");
    assert!(request.body.is_none());
    assert_eq!(request.headers.len(), 2);
    assert_eq!(request.headers["Authorization"], "Bearer sk-typed");
    assert_eq!(request.headers["X-Team"], "search");
}

#[test]
fn verify_request_requires_url() {
    let err = assert_err!(ConnectConfig::default().verify_request("sk-typed"));
    assert!(err.to_string().contains("connect.url"));
}

#[test]
fn timeout_is_unset_by_default_and_parsed_in_seconds() {
    assert!(ConnectConfig::default().timeout().is_none());

    let config = assert_ok!(Config::from_toml_str("[connect]\ntimeout_secs = 45\n"));
    assert_eq!(config.connect.timeout(), Some(Duration::from_secs(45)));
}
