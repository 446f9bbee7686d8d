use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::transport::{Transport, classify};
use crate::dispatch::{Headers, OutgoingRequest};
use crate::error::{BridgeError, CONNECTION_FAILED_MESSAGE, INVALID_KEY_MESSAGE};

/// Decision of a verification classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(String),
}

/// Decides whether a verification response means the key is good.
pub trait VerificationClassifier: Send + Sync {
    fn classify(&self, result: &Value, key: &str) -> Verdict;
}

impl<F> VerificationClassifier for F
where
    F: Fn(&Value, &str) -> Verdict + Send + Sync,
{
    fn classify(&self, result: &Value, key: &str) -> Verdict {
        self(result, key)
    }
}

/// Treats any JSON body carrying an `error` as a rejection; an error whose
/// code mentions the key maps to the invalid-key message.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorFieldClassifier;

impl VerificationClassifier for ErrorFieldClassifier {
    fn classify(&self, result: &Value, _key: &str) -> Verdict {
        let Some(error) = result.get("error") else {
            return Verdict::Valid;
        };
        let code = error
            .get("code")
            .or_else(|| error.get("type"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if code.contains("key") || code.contains("auth") {
            Verdict::Invalid(INVALID_KEY_MESSAGE.to_string())
        } else {
            Verdict::Invalid(CONNECTION_FAILED_MESSAGE.to_string())
        }
    }
}

pub trait VerificationCallbacks: Send + Sync {
    fn on_success(&self, key: &str);

    fn on_fail(&self, message: &str);

    /// Verification is in progress.
    fn on_load(&self);
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<String>,
}

/// One-shot credential check. Outcomes are reported through callbacks only.
pub struct KeyVerifier {
    transport: Arc<dyn Transport>,
}

impl KeyVerifier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn verify(
        &self,
        key: &str,
        request: VerifyRequest,
        callbacks: &dyn VerificationCallbacks,
        classifier: &dyn VerificationClassifier,
    ) {
        if key.is_empty() {
            callbacks.on_fail(&BridgeError::InvalidKey.user_message());
            return;
        }
        callbacks.on_load();

        let outgoing = OutgoingRequest {
            url: request.url,
            method: request.method,
            headers: request.headers,
            body: request.body.map(String::into_bytes),
        };

        let result = match self.transport.send(outgoing).await {
            Ok(raw) => classify(&raw).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(result) => match classifier.classify(&result, key) {
                Verdict::Valid => callbacks.on_success(key),
                Verdict::Invalid(message) => callbacks.on_fail(&message),
            },
            Err(err) => {
                tracing::error!("key verification failed: {err}");
                callbacks.on_fail(&BridgeError::ConnectionFailed.user_message());
            }
        }
    }
}
