use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::WebModelConfig;
use crate::dispatch::Delivery;
use crate::error::{BridgeError, ErrorKind};
use crate::model::cache::{self, CacheStorage};
use crate::model::config::{self as model_config, DEFAULT_SYSTEM_PROMPT, USE_WEB_WORKER};
use crate::model::discovery::CapabilitySource;
use crate::model::history::{ConversationTurn, TranscriptMessage, build_history};
use crate::model::registry::{Lease, ModelRegistry};
use crate::model::runtime::{
    ChatOptions, InitProgressReport, ModelRuntime, ModelSession, ProgressCallback, RuntimeError,
    TokenCallback,
};
use crate::schedule::{Sleeper, TokioSleeper};
use crate::sink::{ErrorCategory, MessageContent, MessageSink, Turn};
use crate::stream::StreamSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unloaded,
    Discovering,
    /// Capability found, waiting for the load trigger.
    Ready,
    Loading,
    Loaded,
    Error(ErrorKind),
}

/// When the model gets loaded once the capability is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTrigger {
    Immediate,
    OnFirstMessage,
    /// Only through [`ModelLifecycleController::load`].
    Explicit,
}

impl LoadTrigger {
    /// `custom_intro` is true when the embedding app shows its own intro
    /// message, which suppresses the built-in one.
    pub fn resolve(config: &WebModelConfig, custom_intro: bool) -> Self {
        if config.load.on_init {
            Self::Immediate
        } else if config.load.on_message {
            Self::OnFirstMessage
        } else if !custom_intro && config.intro_message.displayed {
            // The intro message carries the load button.
            Self::Explicit
        } else {
            Self::Immediate
        }
    }
}

/// Collaborators the controller works with.
pub struct ControllerDeps {
    pub registry: Arc<ModelRegistry>,
    pub cache: Arc<dyn CacheStorage>,
    pub sink: Arc<dyn MessageSink>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl ControllerDeps {
    pub fn new(cache: Arc<dyn CacheStorage>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            registry: ModelRegistry::global(),
            cache,
            sink,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

struct Inner {
    state: ModelState,
    runtime: Option<Arc<dyn ModelRuntime>>,
    session: Option<Arc<dyn ModelSession>>,
    lease: Option<Lease>,
    generating: bool,
    intro_removed: bool,
}

/// Drives the process's single on-device model through discovery, loading,
/// generation and teardown.
pub struct ModelLifecycleController {
    config: WebModelConfig,
    delivery: Delivery,
    trigger: LoadTrigger,
    label: String,
    history: Vec<ConversationTurn>,
    registry: Arc<ModelRegistry>,
    cache: Arc<dyn CacheStorage>,
    sink: Arc<dyn MessageSink>,
    sleeper: Arc<dyn Sleeper>,
    inner: Mutex<Inner>,
}

impl ModelLifecycleController {
    pub fn new(
        config: WebModelConfig,
        delivery: Delivery,
        transcript: &[TranscriptMessage],
        custom_intro: bool,
        deps: ControllerDeps,
    ) -> Arc<Self> {
        let trigger = LoadTrigger::resolve(&config, custom_intro);
        let label = config
            .model
            .clone()
            .unwrap_or_else(|| model_config::DEFAULT_MODEL.to_string());
        Arc::new(Self {
            config,
            delivery,
            trigger,
            label,
            history: build_history(transcript),
            registry: deps.registry,
            cache: deps.cache,
            sink: deps.sink,
            sleeper: deps.sleeper,
            inner: Mutex::new(Inner {
                state: ModelState::Unloaded,
                runtime: None,
                session: None,
                lease: None,
                generating: false,
                intro_removed: false,
            }),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ModelState {
        self.inner().state
    }

    pub fn trigger(&self) -> LoadTrigger {
        self.trigger
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ModelState::Loaded
    }

    /// Clears caches if configured, resolves the capability, then loads now
    /// or waits, depending on the trigger.
    pub async fn start(&self, capability: CapabilitySource) {
        if self.config.load.clear_cache
            && let Err(e) = cache::clear_all(&*self.cache).await
        {
            tracing::warn!("failed to clear model caches: {e}");
        }

        self.inner().state = ModelState::Discovering;
        let runtime = match capability.resolve(&*self.sleeper).await {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(
                    "the inference runtime was not provided or never became available: {err}"
                );
                self.fail(err);
                return;
            }
        };

        {
            let mut inner = self.inner();
            inner.runtime = Some(runtime);
            inner.state = ModelState::Ready;
        }
        tracing::info!(model = self.label, trigger = ?self.trigger, "runtime capability ready");

        if self.trigger == LoadTrigger::Immediate {
            // Failures are already surfaced in the transcript.
            let _ = self.load().await;
        }
    }

    /// Loads the model. A no-op if this controller is already loading or
    /// loaded; `MultipleModels` if another session holds the process slot.
    pub async fn load(&self) -> Result<(), BridgeError> {
        let Some((session, lease)) = self.claim()? else {
            return Ok(());
        };

        session.set_progress_callback(self.progress_callback());

        let resolved = model_config::resolve(&self.config);
        let options = ChatOptions {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            conversation_history: self.history.clone(),
        };
        tracing::info!(
            model = resolved.model,
            use_cache = resolved.app_config.use_cache,
            history_turns = options.conversation_history.len(),
            "loading model"
        );

        let result = session
            .reload(&resolved.model, &options, &resolved.app_config)
            .await;

        // unload() during reload takes the lease; check and transition under one lock.
        let still_held = {
            let mut inner = self.inner();
            let held = inner.lease == Some(lease);
            if held && result.is_ok() {
                inner.state = ModelState::Loaded;
            }
            held
        };
        if !still_held {
            tracing::warn!(
                model = resolved.model,
                "model was unloaded while loading, discarding session"
            );
            if let Err(e) = session.unload().await {
                tracing::warn!("session unload failed: {e}");
            }
            return Err(BridgeError::Other("model was unloaded while loading".to_string()));
        }

        match result {
            Ok(files) => {
                self.after_load(&files);
                tracing::info!(model = resolved.model, files = files.len(), "model loaded");
                Ok(())
            }
            Err(err) => {
                self.unload_chat(&err).await;
                Err(BridgeError::Generic(err.message))
            }
        }
    }

    /// Synchronous guard: checks and claims the process slot before any
    /// suspension point. Returns `None` when there is nothing to do.
    fn claim(&self) -> Result<Option<(Arc<dyn ModelSession>, Lease)>, BridgeError> {
        let mut inner = self.inner();
        if matches!(inner.state, ModelState::Loading | ModelState::Loaded) {
            return Ok(None);
        }
        let Some(runtime) = inner.runtime.clone() else {
            drop(inner);
            tracing::error!("load requested before the runtime capability was available");
            self.fail(BridgeError::ModuleNotFound);
            return Err(BridgeError::ModuleNotFound);
        };

        let lease = match self.registry.acquire(&self.label) {
            Ok(lease) => lease,
            Err(err) => {
                drop(inner);
                tracing::error!("{}", crate::error::MULTIPLE_MODELS_MESSAGE);
                self.fail(BridgeError::MultipleModels);
                return Err(err);
            }
        };

        let session = self
            .config
            .worker
            .as_deref()
            .filter(|_| USE_WEB_WORKER)
            .and_then(|worker| {
                let session = runtime.create_worker_session(worker);
                if session.is_none() {
                    tracing::warn!(worker, "runtime has no worker support, using main session");
                }
                session
            })
            .unwrap_or_else(|| runtime.create_session());

        inner.session = Some(Arc::clone(&session));
        inner.lease = Some(lease);
        inner.state = ModelState::Loading;
        Ok(Some((session, lease)))
    }

    /// Progress overwrites one message in place; the first event also scrolls it into view.
    fn progress_callback(&self) -> ProgressCallback {
        let sink = Arc::clone(&self.sink);
        let auto_scroll = self.config.intro_message.auto_scroll;
        let first = AtomicBool::new(true);
        Arc::new(move |report: &InitProgressReport| {
            sink.add_new_message(
                MessageContent::html(format!("<div>{}</div>", report.text)).overwriting(),
                true,
                false,
            );
            if first.swap(false, Ordering::SeqCst) && auto_scroll {
                sink.scroll_to_bottom();
            }
        })
    }

    fn after_load(&self, files: &[String]) {
        let intro = &self.config.intro_message;
        if !intro.remove_after_load {
            self.sink
                .add_new_message(MessageContent::html(loaded_notice(files)).overwriting(), true, false);
        } else if !intro.displayed {
            // Only the progress message is on screen.
            self.sink.remove_last_message();
        } else {
            self.remove_intro();
        }
    }

    fn remove_intro(&self) {
        let mut inner = self.inner();
        if !inner.intro_removed {
            inner.intro_removed = true;
            drop(inner);
            self.sink.remove_introductory_message();
        }
    }

    /// Whether a message with this text may be submitted right now.
    pub fn can_submit(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let inner = self.inner();
        if inner.state == ModelState::Loading || inner.generating {
            return false;
        }
        inner.state == ModelState::Loaded || self.trigger == LoadTrigger::OnFirstMessage
    }

    /// Answers `prompt` with the loaded model, loading it first when loading
    /// is deferred to the first message. The turn always finishes.
    pub async fn submit(&self, prompt: &str, turn: Arc<Turn>) {
        if !self.is_loaded() {
            if self.trigger != LoadTrigger::OnFirstMessage {
                tracing::warn!("message submitted before the model was loaded");
                turn.finish();
                return;
            }
            if self.load().await.is_err() {
                turn.finish();
                return;
            }
        }

        let session = {
            let mut inner = self.inner();
            let available = inner.state == ModelState::Loaded && !inner.generating;
            match inner.session.clone().filter(|_| available) {
                Some(session) => {
                    inner.generating = true;
                    session
                }
                None => {
                    drop(inner);
                    tracing::warn!("model is busy or unavailable, dropping message");
                    turn.finish();
                    return;
                }
            }
        };

        if self.config.intro_message.remove_after_message {
            self.remove_intro();
        }
        self.sink.add_loading_message();

        match self.delivery {
            Delivery::Immediate => self.immediate_response(&*session, prompt, &turn).await,
            Delivery::Stream => self.stream_response(session, prompt, &turn).await,
        }

        self.inner().generating = false;
    }

    async fn immediate_response(&self, session: &dyn ModelSession, prompt: &str, turn: &Turn) {
        match session.generate(prompt, None).await {
            Ok(output) => {
                self.sink
                    .add_new_message(MessageContent::text(output), true, true);
            }
            Err(err) => self.generation_failed(err).await,
        }
        turn.finish();
    }

    async fn stream_response(&self, session: Arc<dyn ModelSession>, prompt: &str, turn: &Turn) {
        let abort = turn.abort_handle();
        let interrupter = {
            let session = Arc::clone(&session);
            let abort = abort.clone();
            tokio::spawn(async move {
                abort.cancelled().await;
                tracing::debug!("interrupting generation");
                session.interrupt_generate().await;
            })
        };

        turn.open();
        let stream = Arc::new(Mutex::new(StreamSession::new(Arc::clone(&self.sink))));
        let on_token: TokenCallback = {
            let stream = Arc::clone(&stream);
            let abort = abort.clone();
            Arc::new(move |_step: u32, message: &str| {
                if abort.is_cancelled() {
                    return;
                }
                stream
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .upsert(message, true);
            })
        };

        let result = session.generate(prompt, Some(on_token)).await;
        interrupter.abort();
        stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finalize();

        match result {
            Ok(_) => {}
            Err(_) if abort.is_cancelled() => {
                tracing::debug!("generation ended by interrupt");
            }
            Err(err) => self.generation_failed(err).await,
        }
        turn.close();
    }

    async fn generation_failed(&self, err: RuntimeError) {
        if err.unusable {
            self.unload_chat(&err).await;
        } else {
            tracing::error!("generation failed: {err}");
            self.sink
                .add_new_error_message(ErrorCategory::Service, &BridgeError::Generic(err.message).user_message());
        }
    }

    /// Shows the generic error, tears the session down and leaves the
    /// controller in the error state so a new load may be attempted.
    async fn unload_chat(&self, err: &RuntimeError) {
        tracing::error!("model session failed: {err}");
        self.sink.add_new_error_message(
            ErrorCategory::Service,
            &BridgeError::Generic(err.message.clone()).user_message(),
        );
        self.unload().await;
        self.inner().state = ModelState::Error(ErrorKind::GenericLoadOrGeneration);
    }

    /// Unloads the session and releases the process slot.
    pub async fn unload(&self) {
        let (session, lease) = {
            let mut inner = self.inner();
            inner.state = ModelState::Unloaded;
            inner.generating = false;
            (inner.session.take(), inner.lease.take())
        };
        if let Some(session) = session
            && let Err(e) = session.unload().await
        {
            tracing::warn!("session unload failed: {e}");
        }
        if let Some(lease) = lease {
            self.registry.release(lease);
        }
    }

    fn fail(&self, err: BridgeError) {
        self.inner().state = ModelState::Error(err.kind());
        self.sink
            .add_new_error_message(ErrorCategory::Service, &err.user_message());
    }
}

impl Drop for ModelLifecycleController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.lease.is_some() {
            tracing::warn!(model = self.label, "controller dropped while holding the model slot; call unload()");
        }
    }
}

fn loaded_notice(files: &[String]) -> String {
    if files.is_empty() {
        "<div>Model loaded</div>".to_string()
    } else {
        format!("<div>Model loaded</div><div>Files: {}</div>", files.join(", "))
    }
}
