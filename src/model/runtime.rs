use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::config::AppConfig;
use crate::model::history::ConversationTurn;

/// Load progress as reported by the inference runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct InitProgressReport {
    pub progress: f64,
    pub time_elapsed: f64,
    pub text: String,
}

pub type ProgressCallback = Arc<dyn Fn(&InitProgressReport) + Send + Sync>;

/// Called with the step number and the full message generated so far.
pub type TokenCallback = Arc<dyn Fn(u32, &str) + Send + Sync>;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    /// The session cannot serve further requests and must be unloaded.
    pub unusable: bool,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            unusable: false,
        }
    }

    pub fn unusable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            unusable: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub system: String,
    pub conversation_history: Vec<ConversationTurn>,
}

/// One loaded (or loading) model instance.
#[async_trait]
pub trait ModelSession: Send + Sync {
    fn set_progress_callback(&self, callback: ProgressCallback);

    /// Loads `model`; returns the names of the artifacts that were loaded.
    async fn reload(
        &self,
        model: &str,
        options: &ChatOptions,
        app_config: &AppConfig,
    ) -> Result<Vec<String>, RuntimeError>;

    /// Without a callback the whole reply is returned at once.
    async fn generate(
        &self,
        prompt: &str,
        on_token: Option<TokenCallback>,
    ) -> Result<String, RuntimeError>;

    async fn interrupt_generate(&self);

    async fn unload(&self) -> Result<(), RuntimeError>;
}

/// The injected inference capability.
pub trait ModelRuntime: Send + Sync {
    fn create_session(&self) -> Arc<dyn ModelSession>;

    /// `None` when the runtime cannot host sessions in a worker.
    fn create_worker_session(&self, _worker: &str) -> Option<Arc<dyn ModelSession>> {
        None
    }
}
