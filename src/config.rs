use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::verify::VerifyRequest;
use crate::dispatch::{Delivery, Headers, RequestContext, redacted};
use crate::error::BridgeError;

pub const DEFAULT_CONFIG_FILE: &str = "chatbridge.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connect: ConnectConfig,
    pub web_model: WebModelConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Reads `$CHATBRIDGE_CONFIG` (or `chatbridge.toml`), then applies
    /// environment overrides. A missing or unreadable file yields defaults.
    pub fn load() -> Self {
        let path = env::var("CHATBRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = match Self::from_path(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("using default config: {e}");
                Self::default()
            }
        };
        config.apply_env();
        config
    }

    pub fn from_path(path: &Path) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Other(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, BridgeError> {
        toml::from_str(text).map_err(|e| BridgeError::SchemaParse(format!("config: {e}")))
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("CHATBRIDGE_URL") {
            self.connect.url = Some(url);
        }
        if let Ok(method) = env::var("CHATBRIDGE_METHOD") {
            self.connect.method = method;
        }
        if let Ok(key) = env::var("CHATBRIDGE_API_KEY") {
            self.connect.api_key = Some(key);
        }
        if self.connect.url.is_none() {
            tracing::warn!("no connect.url configured, requests cannot be dispatched");
        }
    }
}

/// Backend endpoint settings for dispatch, polling and key verification.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    pub url: Option<String>,
    pub method: String,
    pub headers: Headers,
    pub api_key: Option<String>,
    pub stream: bool,
    pub stream_interval_ms: u64,
    /// Unset keeps polling until the server reports completion.
    pub max_poll_attempts: Option<u32>,
    /// Per-request deadline; unset waits as long as the server takes.
    pub timeout_secs: Option<u64>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: None,
            method: crate::dispatch::DEFAULT_METHOD.to_string(),
            headers: Headers::new(),
            api_key: None,
            stream: false,
            stream_interval_ms: 6,
            max_poll_attempts: None,
            timeout_secs: None,
        }
    }
}

impl ConnectConfig {
    pub fn delivery(&self) -> Delivery {
        if self.stream {
            Delivery::Stream
        } else {
            Delivery::Immediate
        }
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Headers with the API key folded in as a bearer token, unless an
    /// Authorization header is already configured.
    pub fn effective_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        if let Some(key) = &self.api_key
            && !headers.keys().any(|k| k.eq_ignore_ascii_case("authorization"))
        {
            headers.insert("Authorization".to_string(), format!("Bearer {key}"));
        }
        headers
    }

    pub fn request_context(&self, body: serde_json::Value) -> Result<RequestContext, BridgeError> {
        let url = self.required_url()?;
        Ok(RequestContext::new(url)
            .method(self.method.clone())
            .headers(self.effective_headers())
            .json(body))
    }

    fn required_url(&self) -> Result<String, BridgeError> {
        self.url
            .clone()
            .ok_or_else(|| BridgeError::Other("connect.url is not configured".to_string()))
    }

    /// Verification request for `key`. The key under test replaces any
    /// configured one in the bearer header.
    pub fn verify_request(&self, key: &str) -> Result<VerifyRequest, BridgeError> {
        let url = self.required_url()?;
        let mut headers = self.headers.clone();
        headers.retain(|k, _| !k.eq_ignore_ascii_case("authorization"));
        headers.insert("Authorization".to_string(), format!("Bearer {key}"));
        Ok(VerifyRequest {
            url,
            method: self.method.clone(),
            headers,
            body: None,
        })
    }
}

impl std::fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &redacted(&self.headers))
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("stream", &self.stream)
            .field("stream_interval_ms", &self.stream_interval_ms)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// On-device model settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WebModelConfig {
    pub model: Option<String>,
    /// Worker script handle; when set the session runs off the main runtime.
    pub worker: Option<String>,
    pub urls: ModelUrls,
    pub load: LoadConfig,
    pub intro_message: IntroMessageConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelUrls {
    pub model: Option<String>,
    pub wasm: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub on_init: bool,
    pub on_message: bool,
    /// Load without populating or reading the artifact caches.
    pub skip_cache: bool,
    /// Empty both artifact caches before anything else happens.
    pub clear_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IntroMessageConfig {
    pub displayed: bool,
    pub auto_scroll: bool,
    pub remove_after_load: bool,
    pub remove_after_message: bool,
}

impl Default for IntroMessageConfig {
    fn default() -> Self {
        Self {
            displayed: true,
            auto_scroll: true,
            remove_after_load: false,
            remove_after_message: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".chatbridge/cache"),
        }
    }
}
