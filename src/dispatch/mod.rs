pub mod http;
pub mod intercept;
pub mod poll;
pub mod transport;
pub mod verify;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::intercept::{RequestInterceptor, ResponseInterceptor};

pub type Headers = BTreeMap<String, String>;

pub const DEFAULT_METHOD: &str = "POST";

/// Outgoing request body before serialization.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Serialized to JSON text before sending.
    Json(Value),
    /// Sent as-is (multipart payloads, pre-encoded bodies).
    Raw {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

/// The part of a request a pre-send interceptor may rewrite.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestDetails {
    pub body: Body,
    pub headers: Headers,
}

/// How a successful text result reaches the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Immediate,
    Stream,
}

/// One call's request description. Built fresh per call.
#[derive(Clone)]
pub struct RequestContext {
    pub url: String,
    pub method: String,
    pub details: RequestDetails,
    pub request_interceptor: Option<Arc<dyn RequestInterceptor>>,
    pub response_interceptor: Option<Arc<dyn ResponseInterceptor>>,
}

impl RequestContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: DEFAULT_METHOD.to_string(),
            details: RequestDetails::default(),
            request_interceptor: None,
            response_interceptor: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.details.headers.extend(headers);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.details.body = Body::Json(body);
        self
    }

    pub fn raw(mut self, bytes: Vec<u8>, content_type: Option<String>) -> Self {
        self.details.body = Body::Raw {
            bytes,
            content_type,
        };
        self
    }

    pub fn with_request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request_interceptor = Some(interceptor);
        self
    }

    pub fn with_response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response_interceptor = Some(interceptor);
        self
    }

    /// Applies the pre-send interceptor, then serializes the body.
    pub fn into_outgoing(self) -> Result<OutgoingRequest, crate::error::BridgeError> {
        let details = match &self.request_interceptor {
            Some(interceptor) => interceptor.intercept(self.details),
            None => self.details,
        };
        let RequestDetails { body, mut headers } = details;

        let body = match body {
            Body::Empty => None,
            Body::Json(value) => {
                if !has_header(&headers, "content-type") {
                    headers.insert("Content-Type".to_string(), "application/json".to_string());
                }
                Some(serde_json::to_vec(&value).map_err(|e| {
                    crate::error::BridgeError::Other(format!("failed to serialize body: {e}"))
                })?)
            }
            Body::Raw {
                bytes,
                content_type,
            } => {
                if let Some(ct) = content_type
                    && !has_header(&headers, "content-type")
                {
                    headers.insert("Content-Type".to_string(), ct);
                }
                Some(bytes)
            }
        };

        Ok(OutgoingRequest {
            url: self.url,
            method: self.method,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &redacted(&self.details.headers))
            .field("body", &self.details.body)
            .field("request_interceptor", &self.request_interceptor.is_some())
            .field("response_interceptor", &self.response_interceptor.is_some())
            .finish()
    }
}

/// A fully prepared request, ready for the transport.
#[derive(Clone, PartialEq)]
pub struct OutgoingRequest {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl OutgoingRequest {
    pub fn body_json(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

impl std::fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &redacted(&self.headers))
            .field("body_bytes", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

fn has_header(headers: &Headers, name: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

const SECRET_HEADERS: &[&str] = &["authorization", "x-api-key", "api-key", "x-goog-api-key"];

pub(crate) fn redacted(headers: &Headers) -> BTreeMap<&str, &str> {
    headers
        .iter()
        .map(|(k, v)| {
            let secret = SECRET_HEADERS.iter().any(|s| k.eq_ignore_ascii_case(s));
            (k.as_str(), if secret { "[REDACTED]" } else { v.as_str() })
        })
        .collect()
}
