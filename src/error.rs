use thiserror::Error;

pub const INVALID_KEY_MESSAGE: &str = "Invalid API Key";
pub const CONNECTION_FAILED_MESSAGE: &str = "Failed to connect";
pub const MULTIPLE_MODELS_MESSAGE: &str = "Cannot run multiple web models";
pub const MODULE_NOT_FOUND_MESSAGE: &str = "WebLLM module not found";
pub const GENERIC_MODEL_MESSAGE: &str = "Error, please check the following list of \
     [instructions](https://deepchat.dev/docs/webModel#error) to fix this.";

/// Taxonomy tag for a [`BridgeError`], independent of the payload it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidResponse,
    ConnectionFailed,
    InvalidKey,
    ModuleNotFound,
    MultipleModels,
    GenericLoadOrGeneration,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid response: {message}")]
    InvalidResponse {
        message: String,
        /// The raw (or extracted) payload that failed validation.
        result: Option<serde_json::Value>,
    },

    #[error("connection failed")]
    ConnectionFailed,

    #[error("invalid key")]
    InvalidKey,

    #[error("runtime capability not found")]
    ModuleNotFound,

    #[error("a model session already exists in this process")]
    MultipleModels,

    #[error("model error: {0}")]
    Generic(String),

    #[error("server error: {0}")]
    Upstream(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("polling gave up after {attempts} attempts")]
    PollLimit { attempts: u32 },

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    pub fn invalid_response(message: impl Into<String>, result: Option<serde_json::Value>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
            result,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailed | Self::Request(_) | Self::Transport(_) | Self::Timeout(_) => {
                ErrorKind::ConnectionFailed
            }
            Self::InvalidKey => ErrorKind::InvalidKey,
            Self::ModuleNotFound => ErrorKind::ModuleNotFound,
            Self::MultipleModels => ErrorKind::MultipleModels,
            Self::Generic(_) => ErrorKind::GenericLoadOrGeneration,
            Self::InvalidResponse { .. }
            | Self::Upstream(_)
            | Self::SchemaParse(_)
            | Self::PollLimit { .. }
            | Self::Other(_) => ErrorKind::InvalidResponse,
        }
    }

    /// Text rendered into the chat transcript. Server-supplied messages pass
    /// through; transport internals (URLs, connection details) do not.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidResponse { message, .. } => message.clone(),
            Self::ConnectionFailed => CONNECTION_FAILED_MESSAGE.to_string(),
            Self::InvalidKey => INVALID_KEY_MESSAGE.to_string(),
            Self::ModuleNotFound => MODULE_NOT_FOUND_MESSAGE.to_string(),
            Self::MultipleModels => MULTIPLE_MODELS_MESSAGE.to_string(),
            Self::Generic(_) => GENERIC_MODEL_MESSAGE.to_string(),
            Self::Upstream(message) => message.clone(),
            Self::Transport(_) | Self::Request(_) => "request to service failed".to_string(),
            Self::SchemaParse(_) => "failed to parse service response".to_string(),
            Self::PollLimit { attempts } => {
                format!("service did not finish after {attempts} status checks")
            }
            Self::Timeout(ms) => format!("request timed out after {ms}ms"),
            Self::Other(msg) => msg.clone(),
        }
    }
}
