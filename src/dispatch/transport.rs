use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;

use crate::dispatch::OutgoingRequest;
use crate::error::BridgeError;

const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024; // 4MB

/// Raw transport result, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: body.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport result after classification: the validity flag and the
/// normalized payload are computed independently.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub valid: bool,
    pub payload: Value,
}

impl ResponseEnvelope {
    pub async fn from_raw(raw: &RawResponse) -> Result<Self, BridgeError> {
        Ok(Self {
            status: raw.status,
            valid: raw.is_success(),
            payload: classify(raw).await?,
        })
    }
}

/// Sends one prepared request and returns the unparsed response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, BridgeError>;
}

pub struct HttpTransport {
    client: Client,
    timeout: Option<Duration>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn request_error(&self, e: reqwest::Error) -> BridgeError {
        match self.timeout {
            Some(timeout) if e.is_timeout() => BridgeError::Timeout(timeout.as_millis() as u64),
            _ => BridgeError::Request(e),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, BridgeError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| BridgeError::Transport(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| self.request_error(e))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(BridgeError::Transport(format!(
                "response too large: {} bytes (max {})",
                bytes.len(),
                MAX_RESPONSE_BYTES
            )));
        }

        tracing::debug!(status, content_type = content_type.as_deref(), "response received");

        Ok(RawResponse {
            status,
            content_type,
            body: bytes.to_vec(),
        })
    }
}

/// Normalizes a response body by its declared content type.
///
/// - `application/json` (and `+json` types): parsed JSON
/// - `text/event-stream`: array of event payloads, JSON where parseable
/// - other `text/*` or no content type: a string
/// - anything else: `{"contentType": .., "base64": ..}`
pub async fn classify(raw: &RawResponse) -> Result<Value, BridgeError> {
    let content_type = raw
        .content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase())
        .unwrap_or_default();

    if content_type.contains("json") {
        return parse_json(&raw.body);
    }
    if content_type.contains("text/event-stream") {
        return parse_event_stream(&raw.body).await;
    }
    if content_type.is_empty() || content_type.starts_with("text/") {
        return Ok(Value::String(String::from_utf8_lossy(&raw.body).into_owned()));
    }

    Ok(serde_json::json!({
        "contentType": content_type,
        "base64": STANDARD.encode(&raw.body),
    }))
}

/// Polling responses are always read as JSON regardless of content type.
pub fn classify_json(raw: &RawResponse) -> Result<Value, BridgeError> {
    parse_json(&raw.body)
}

fn parse_json(body: &[u8]) -> Result<Value, BridgeError> {
    serde_json::from_slice(body)
        .map_err(|e| BridgeError::SchemaParse(format!("response is not valid JSON: {e}")))
}

async fn parse_event_stream(body: &[u8]) -> Result<Value, BridgeError> {
    let chunks = futures_util::stream::iter([Ok::<_, std::convert::Infallible>(body.to_vec())]);
    let mut events = std::pin::pin!(chunks.eventsource());

    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        let event = event.map_err(|e| BridgeError::SchemaParse(format!("event stream: {e}")))?;
        if event.data.is_empty() || event.data == "[DONE]" {
            continue;
        }
        let value = serde_json::from_str(&event.data).unwrap_or(Value::String(event.data));
        out.push(value);
    }
    Ok(Value::Array(out))
}
