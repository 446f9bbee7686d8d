use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::intercept::{JsonPollExtractor, PollExtractor, PollOutcome};
use crate::dispatch::transport::{Transport, classify_json};
use crate::dispatch::RequestContext;
use crate::error::BridgeError;
use crate::schedule::{Sleeper, TokioSleeper};
use crate::sink::{ErrorReporter, MessageSink, SinkErrorReporter, Turn};

/// Repeats one request against the same endpoint until the server returns a
/// terminal payload, waiting the server-supplied delay between attempts.
pub struct PollingController {
    transport: Arc<dyn Transport>,
    extractor: Arc<dyn PollExtractor>,
    reporter: Arc<dyn ErrorReporter>,
    sleeper: Arc<dyn Sleeper>,
    max_attempts: Option<u32>,
}

impl PollingController {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            extractor: Arc::new(JsonPollExtractor),
            reporter: Arc::new(SinkErrorReporter),
            sleeper: Arc::new(TokioSleeper),
            max_attempts: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PollExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Caps the number of requests. `None` polls until the server says done.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub async fn poll(&self, ctx: RequestContext, sink: Arc<dyn MessageSink>, turn: Arc<Turn>) {
        if let Err(err) = self.run(ctx, &*sink, &turn).await {
            self.reporter.display_error(&err, &*sink);
            turn.finish();
        }
    }

    async fn run(
        &self,
        ctx: RequestContext,
        sink: &dyn MessageSink,
        turn: &Turn,
    ) -> Result<(), BridgeError> {
        let response_interceptor = ctx.response_interceptor.clone();
        // Intercepted once; every attempt resends the identical request.
        let request = ctx.into_outgoing()?;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tracing::debug!(url = request.url, attempt, "polling");

            let raw = self.transport.send(request.clone()).await?;
            let payload = classify_json(&raw)?;
            let payload = match &response_interceptor {
                Some(interceptor) => interceptor.intercept(payload),
                None => payload,
            };

            match self.extractor.extract(payload).await? {
                PollOutcome::Retry { timeout_ms } => {
                    if let Some(max) = self.max_attempts
                        && attempt >= max
                    {
                        return Err(BridgeError::PollLimit { attempts: attempt });
                    }
                    self.sleeper.sleep(Duration::from_millis(timeout_ms)).await;
                }
                PollOutcome::Done(content) => {
                    tracing::info!(url = request.url, attempts = attempt, "finished polling");
                    sink.add_new_message(content, true, true);
                    turn.finish();
                    return Ok(());
                }
            }
        }
    }
}
