use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::intercept::{Extraction, JsonExtractor, ResultExtractor};
use crate::dispatch::transport::{HttpTransport, ResponseEnvelope, Transport};
use crate::dispatch::{Delivery, RequestContext};
use crate::error::BridgeError;
use crate::sink::{ErrorReporter, MessageSink, SinkErrorReporter, Turn};
use crate::stream::StreamAdapter;

/// Runs one request/response cycle and delivers the result to the transcript.
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    extractor: Arc<dyn ResultExtractor>,
    reporter: Arc<dyn ErrorReporter>,
    stream: StreamAdapter,
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(HttpTransport::new()))
    }
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            extractor: Arc::new(JsonExtractor),
            reporter: Arc::new(SinkErrorReporter),
            stream: StreamAdapter::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ResultExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_stream_adapter(mut self, stream: StreamAdapter) -> Self {
        self.stream = stream;
        self
    }

    /// Every path ends the turn exactly once: through the stream closing,
    /// through immediate delivery, or through the error path below. The one
    /// exception is a result that says completion arrives by another request.
    pub async fn dispatch(
        &self,
        ctx: RequestContext,
        delivery: Delivery,
        sink: Arc<dyn MessageSink>,
        turn: Arc<Turn>,
    ) {
        if let Err(err) = self.run(ctx, delivery, &sink, &turn).await {
            self.reporter.display_error(&err, &*sink);
            turn.finish();
        }
    }

    async fn run(
        &self,
        ctx: RequestContext,
        delivery: Delivery,
        sink: &Arc<dyn MessageSink>,
        turn: &Turn,
    ) -> Result<(), BridgeError> {
        let response_interceptor = ctx.response_interceptor.clone();
        let request = ctx.into_outgoing()?;
        tracing::debug!(url = request.url, method = request.method, "dispatching request");

        let raw = self.transport.send(request).await?;
        let ResponseEnvelope {
            status,
            valid,
            payload: classified,
        } = ResponseEnvelope::from_raw(&raw).await?;

        let intercepted = response_interceptor.is_some();
        let payload = match &response_interceptor {
            Some(interceptor) => interceptor.intercept(classified.clone()),
            None => classified.clone(),
        };

        // Extraction runs before the status check so a structured error body
        // can surface its own message.
        let extraction = self.extractor.extract(payload).await?;

        if !valid {
            return Err(BridgeError::invalid_response(
                format!("service responded with HTTP {status}"),
                Some(classified),
            ));
        }

        match extraction {
            Extraction::Malformed(result) => Err(BridgeError::invalid_response(
                invalid_response_message(&classified, intercepted.then_some(&result)),
                Some(result),
            )),
            Extraction::PollingElsewhere => {
                tracing::debug!("result is delivered by another request");
                Ok(())
            }
            Extraction::Message(content) => {
                let streamable = content.text.clone().filter(|t| !t.is_empty());
                match (delivery, streamable) {
                    (Delivery::Stream, Some(text)) => {
                        self.stream.simulate(Arc::clone(sink), turn, &text).await;
                    }
                    _ => {
                        sink.add_new_message(content, true, true);
                        turn.finish();
                    }
                }
                Ok(())
            }
        }
    }
}

/// Describes a payload that could not be turned into a message.
pub fn invalid_response_message(result: &Value, intercepted: Option<&Value>) -> String {
    let mut message = format!("Response is not in the expected format: {result}");
    if let Some(intercepted) = intercepted {
        message.push_str(&format!(
            ". After the response interceptor it was: {intercepted}"
        ));
    }
    message
}
