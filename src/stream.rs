use std::sync::Arc;
use std::time::Duration;

use crate::schedule::{Sleeper, TokioSleeper};
use crate::sink::{MessageContent, MessageSink, Turn};

/// Default pause between simulated chunks.
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_millis(6);

/// Accumulates the text of one in-flight bot message and mirrors it into the
/// sink. The first update appends a message; later updates overwrite it.
pub struct StreamSession {
    sink: Arc<dyn MessageSink>,
    text: String,
    started: bool,
    finalized: bool,
}

impl StreamSession {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            text: String::new(),
            started: false,
            finalized: false,
        }
    }

    /// Appends `chunk`, or replaces the accumulated text when `overwrite` is set.
    pub fn upsert(&mut self, chunk: &str, overwrite: bool) {
        if self.finalized {
            tracing::debug!("dropping stream update after finalize");
            return;
        }
        if overwrite {
            self.text.clear();
        }
        self.text.push_str(chunk);

        let mut content = MessageContent::text(self.text.clone());
        content.overwrite = self.started;
        self.sink.add_new_message(content, true, false);
        self.started = true;
    }

    /// Marks the message final. Only the first call has an effect.
    pub fn finalize(&mut self) -> &str {
        if !self.finalized {
            self.finalized = true;
            if self.started {
                self.sink.add_new_message(
                    MessageContent::text(self.text.clone()).overwriting(),
                    true,
                    true,
                );
            }
        }
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_open(&self) -> bool {
        !self.finalized
    }
}

/// Turns a complete payload into a sequence of partial message updates.
#[derive(Clone)]
pub struct StreamAdapter {
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
}

impl Default for StreamAdapter {
    fn default() -> Self {
        Self::new(Arc::new(TokioSleeper), DEFAULT_STREAM_INTERVAL)
    }
}

impl StreamAdapter {
    pub fn new(sleeper: Arc<dyn Sleeper>, interval: Duration) -> Self {
        Self { sleeper, interval }
    }

    pub fn session(&self, sink: Arc<dyn MessageSink>) -> StreamSession {
        StreamSession::new(sink)
    }

    /// Plays `text` back word by word, then finalizes and closes the turn.
    /// Aborting the turn stops playback after the current chunk.
    pub async fn simulate(&self, sink: Arc<dyn MessageSink>, turn: &Turn, text: &str) -> String {
        turn.open();
        let mut session = self.session(sink);

        for (i, chunk) in text.split_inclusive(' ').enumerate() {
            if i > 0 {
                self.sleeper.sleep(self.interval).await;
            }
            if turn.is_aborted() {
                tracing::debug!(delivered = session.text().len(), "simulated stream aborted");
                break;
            }
            session.upsert(chunk, false);
        }

        let delivered = session.finalize().to_string();
        turn.close();
        delivered
    }
}
