use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

/// Content of one visible chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Replace the last bot message in place instead of appending a new one.
    #[serde(default)]
    pub overwrite: bool,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            ..Self::default()
        }
    }

    pub fn overwriting(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Service,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
        }
    }
}

/// The chat transcript as seen by this crate. Rendering is the implementor's concern.
pub trait MessageSink: Send + Sync {
    /// `send_update` marks the message as final for listeners outside the view.
    fn add_new_message(&self, content: MessageContent, is_bot: bool, send_update: bool);

    fn add_loading_message(&self);

    fn remove_last_message(&self);

    fn add_new_error_message(&self, category: ErrorCategory, text: &str);

    fn remove_introductory_message(&self);

    fn scroll_to_bottom(&self) {}
}

/// Renders a failure into the transcript.
pub trait ErrorReporter: Send + Sync {
    fn display_error(&self, err: &BridgeError, sink: &dyn MessageSink);
}

/// Logs the error and shows its user-facing text as a service error message.
#[derive(Debug, Default, Clone, Copy)]
pub struct SinkErrorReporter;

impl ErrorReporter for SinkErrorReporter {
    fn display_error(&self, err: &BridgeError, sink: &dyn MessageSink) {
        tracing::error!(kind = ?err.kind(), "{err}");
        sink.add_new_error_message(ErrorCategory::Service, &err.user_message());
    }
}

/// Receives the turn-taking signals of one chat turn.
pub trait TurnObserver: Send + Sync {
    fn on_open(&self) {}

    fn on_close(&self) {}

    fn on_finish(&self);
}

struct NoopObserver;

impl TurnObserver for NoopObserver {
    fn on_finish(&self) {}
}

/// Signals for one chat turn. `finish` reaches the observer at most once no
/// matter how many paths try to fire it.
pub struct Turn {
    observer: Arc<dyn TurnObserver>,
    opened: AtomicBool,
    closed: AtomicBool,
    finished: AtomicBool,
    abort: CancellationToken,
}

impl Turn {
    pub fn new(observer: Arc<dyn TurnObserver>) -> Arc<Self> {
        Arc::new(Self {
            observer,
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            abort: CancellationToken::new(),
        })
    }

    pub fn detached() -> Arc<Self> {
        Self::new(Arc::new(NoopObserver))
    }

    pub fn open(&self) {
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.observer.on_open();
        }
    }

    /// Ends a streamed turn: fires `on_close`, then `finish`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.observer.on_close();
        }
        self.finish();
    }

    pub fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            tracing::warn!("turn already finished, ignoring repeated finish");
            return;
        }
        self.observer.on_finish();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Handle that external code uses to stop a streamed turn mid-flight.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }
}

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turn")
            .field("opened", &self.opened.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .field("aborted", &self.abort.is_cancelled())
            .finish()
    }
}
