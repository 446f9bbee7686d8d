//! Tests for key verification: the empty-key short circuit, callback
//! ordering, pluggable classification and connection failures.

mod common;

use std::sync::{Arc, Mutex};

use chatbridge::dispatch::transport::{HttpTransport, RawResponse};
use chatbridge::dispatch::verify::{
    ErrorFieldClassifier, KeyVerifier, Verdict, VerificationCallbacks, VerifyRequest,
};
use chatbridge::dispatch::Headers;
use chatbridge::error::{BridgeError, CONNECTION_FAILED_MESSAGE, INVALID_KEY_MESSAGE};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;

use common::{ScriptedTransport, mock_listener, read_request};

#[derive(Default)]
struct RecordingCallbacks {
    calls: Mutex<Vec<String>>,
}

impl RecordingCallbacks {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl VerificationCallbacks for RecordingCallbacks {
    fn on_success(&self, key: &str) {
        self.calls.lock().unwrap().push(format!("success:{key}"));
    }

    fn on_fail(&self, message: &str) {
        self.calls.lock().unwrap().push(format!("fail:{message}"));
    }

    fn on_load(&self) {
        self.calls.lock().unwrap().push("load".to_string());
    }
}

fn request(url: &str) -> VerifyRequest {
    let mut headers = Headers::new();
    headers.insert("Authorization".to_string(), "Bearer sk-test".to_string());
    VerifyRequest {
        url: url.to_string(),
        method: "GET".to_string(),
        headers,
        body: None,
    }
}

#[tokio::test]
async fn empty_key_fails_without_any_request() {
    let transport = ScriptedTransport::json(200, json!({}));
    let callbacks = RecordingCallbacks::default();

    KeyVerifier::new(transport.clone())
        .verify("", request("http://service.test/models"), &callbacks, &ErrorFieldClassifier)
        .await;

    assert_eq!(callbacks.calls(), vec![format!("fail:{INVALID_KEY_MESSAGE}")]);
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn load_fires_before_success() {
    let transport = ScriptedTransport::json(200, json!({"data": []}));
    let callbacks = RecordingCallbacks::default();

    KeyVerifier::new(transport.clone())
        .verify("sk-test", request("http://service.test/models"), &callbacks, &ErrorFieldClassifier)
        .await;

    assert_eq!(callbacks.calls(), vec!["load", "success:sk-test"]);
    let sent = &transport.requests()[0];
    assert_eq!(sent.method, "GET");
    assert!(sent.body.is_none());
}

#[tokio::test]
async fn classifier_decides_and_receives_the_key() {
    let transport = ScriptedTransport::json(200, json!({"valid": false, "reason": "expired"}));
    let callbacks = RecordingCallbacks::default();
    let seen = Arc::new(Mutex::new(None));

    let seen_in = seen.clone();
    let classifier = move |result: &Value, key: &str| {
        *seen_in.lock().unwrap() = Some(key.to_string());
        if result["valid"] == json!(true) {
            Verdict::Valid
        } else {
            Verdict::Invalid(format!("key {}", result["reason"].as_str().unwrap_or("?")))
        }
    };

    KeyVerifier::new(transport)
        .verify("abc", request("http://service.test/check"), &callbacks, &classifier)
        .await;

    assert_eq!(callbacks.calls(), vec!["load", "fail:key expired"]);
    assert_eq!(seen.lock().unwrap().as_deref(), Some("abc"));
}

#[tokio::test]
async fn error_field_classifier_maps_codes() {
    let classifier = ErrorFieldClassifier;
    let bad_key = json!({"error": {"code": "invalid_api_key", "message": "nope"}});
    let other = json!({"error": {"code": "server_overloaded"}});

    use chatbridge::dispatch::verify::VerificationClassifier;
    assert_eq!(classifier.classify(&json!({"ok": true}), "k"), Verdict::Valid);
    assert_eq!(
        classifier.classify(&bad_key, "k"),
        Verdict::Invalid(INVALID_KEY_MESSAGE.to_string())
    );
    assert_eq!(
        classifier.classify(&other, "k"),
        Verdict::Invalid(CONNECTION_FAILED_MESSAGE.to_string())
    );
}

#[tokio::test]
async fn transport_failure_maps_to_connection_failed() {
    let transport = ScriptedTransport::new(vec![Err(BridgeError::Transport("dns".into()))]);
    let callbacks = RecordingCallbacks::default();

    KeyVerifier::new(transport)
        .verify("sk-test", request("http://service.test/models"), &callbacks, &ErrorFieldClassifier)
        .await;

    assert_eq!(
        callbacks.calls(),
        vec!["load".to_string(), format!("fail:{CONNECTION_FAILED_MESSAGE}")]
    );
}

#[tokio::test]
async fn unparseable_body_maps_to_connection_failed() {
    let transport = ScriptedTransport::new(vec![Ok(RawResponse {
        status: 200,
        content_type: Some("application/json".to_string()),
        body: b"not json".to_vec(),
    })]);
    let callbacks = RecordingCallbacks::default();

    KeyVerifier::new(transport)
        .verify("sk-test", request("http://service.test/models"), &callbacks, &ErrorFieldClassifier)
        .await;

    assert_eq!(
        callbacks.calls(),
        vec!["load".to_string(), format!("fail:{CONNECTION_FAILED_MESSAGE}")]
    );
}

#[tokio::test]
async fn verifies_against_real_socket_with_body() {
    let (listener, port) = mock_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let body = r#"{"error":{"code":"invalid_api_key"}}"#;
        let response = format!(
            "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        request
    });

    let callbacks = RecordingCallbacks::default();
    let mut req = request(&format!("http://127.0.0.1:{port}/verify"));
    req.method = "POST".to_string();
    req.body = Some(r#"{"probe":true}"#.to_string());

    KeyVerifier::new(Arc::new(HttpTransport::new()))
        .verify("sk-bad", req, &callbacks, &ErrorFieldClassifier)
        .await;

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /verify"));
    assert!(raw.contains(r#"{"probe":true}"#));
    assert_eq!(
        callbacks.calls(),
        vec!["load".to_string(), format!("fail:{INVALID_KEY_MESSAGE}")]
    );
}
