//! Strategy seams around one dispatch: a pre-send transform, a post-receive
//! transform, and the extractor that turns a classified payload into a result.
//!
//! Closures implement the interceptor traits directly, so callers can write
//! `Arc::new(|details: RequestDetails| ...)`.

use async_trait::async_trait;
use serde_json::Value;

use crate::dispatch::RequestDetails;
use crate::error::BridgeError;
use crate::sink::MessageContent;

/// Rewrites the body and headers before the request is sent.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, details: RequestDetails) -> RequestDetails;
}

impl<F> RequestInterceptor for F
where
    F: Fn(RequestDetails) -> RequestDetails + Send + Sync,
{
    fn intercept(&self, details: RequestDetails) -> RequestDetails {
        self(details)
    }
}

/// Rewrites the classified payload before extraction.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept(&self, payload: Value) -> Value;
}

impl<F> ResponseInterceptor for F
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn intercept(&self, payload: Value) -> Value {
        self(payload)
    }
}

/// Outcome of extracting a dispatch result.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Message(MessageContent),
    /// Completion is delivered by some other request; nothing to show yet.
    PollingElsewhere,
    Malformed(Value),
}

/// Outcome of extracting one poll response.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Retry { timeout_ms: u64 },
    Done(MessageContent),
}

/// Returning `Err` here is how a server-supplied error message reaches the
/// user: the extractor runs even when the transport reported failure.
#[async_trait]
pub trait ResultExtractor: Send + Sync {
    async fn extract(&self, payload: Value) -> Result<Extraction, BridgeError>;
}

#[async_trait]
pub trait PollExtractor: Send + Sync {
    async fn extract(&self, payload: Value) -> Result<PollOutcome, BridgeError>;
}

/// Reads the generic result shape `{text?, html?, role?, error?,
/// pollingInAnotherRequest?}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExtractor;

#[async_trait]
impl ResultExtractor for JsonExtractor {
    async fn extract(&self, payload: Value) -> Result<Extraction, BridgeError> {
        let Value::Object(map) = &payload else {
            return Ok(Extraction::Malformed(payload));
        };
        if let Some(err) = map.get("error") {
            return Err(BridgeError::Upstream(error_text(err)));
        }
        if map.get("pollingInAnotherRequest").and_then(Value::as_bool) == Some(true) {
            return Ok(Extraction::PollingElsewhere);
        }
        Ok(content_from(payload)
            .map(Extraction::Message)
            .unwrap_or_else(Extraction::Malformed))
    }
}

/// Reads `{timeoutMS}` as "poll again" and anything else as the final result.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPollExtractor;

#[async_trait]
impl PollExtractor for JsonPollExtractor {
    async fn extract(&self, payload: Value) -> Result<PollOutcome, BridgeError> {
        let Value::Object(map) = &payload else {
            return Err(BridgeError::invalid_response(
                "poll response is not an object",
                Some(payload),
            ));
        };
        if let Some(err) = map.get("error") {
            return Err(BridgeError::Upstream(error_text(err)));
        }
        // Zero counts as absent: the job is done.
        if let Some(timeout_ms) = map.get("timeoutMS").and_then(Value::as_u64)
            && timeout_ms > 0
        {
            return Ok(PollOutcome::Retry { timeout_ms });
        }
        content_from(payload)
            .map(PollOutcome::Done)
            .map_err(|v| BridgeError::invalid_response("poll result has an unexpected shape", Some(v)))
    }
}

fn content_from(payload: Value) -> Result<MessageContent, Value> {
    serde_json::from_value::<MessageContent>(payload.clone()).map_err(|_| payload)
}

fn error_text(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        other => other.to_string(),
    }
}
