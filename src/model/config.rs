use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::WebModelConfig;

pub const DEFAULT_MODEL: &str = "Llama-2-7b-chat-hf-q4f32_1";

pub const DEFAULT_SYSTEM_PROMPT: &str = "keep responses to one sentence";

/// Whether sessions may run in a worker when one is configured.
pub const USE_WEB_WORKER: bool = true;

const MODEL_BASE_URL: &str = "https://huggingface.co/mlc-ai";
const LIB_BASE_URL: &str = "https://raw.githubusercontent.com/mlc-ai/binary-mlc-llm-libs/main";

const KNOWN_MODELS: &[&str] = &[
    "Llama-2-7b-chat-hf-q4f32_1",
    "Llama-2-13b-chat-hf-q4f16_1",
    "RedPajama-INCITE-Chat-3B-v1-q4f32_1",
    "vicuna-v1-7b-q4f32_0",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub local_id: String,
    pub model_url: String,
}

/// Runtime configuration handed to the session on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub model_list: Vec<ModelRecord>,
    /// Model id → runtime library URL.
    pub model_lib_map: BTreeMap<String, String>,
    pub use_cache: bool,
}

impl AppConfig {
    /// The template every load starts from.
    pub fn base() -> Self {
        let model_list = KNOWN_MODELS
            .iter()
            .map(|id| ModelRecord {
                local_id: id.to_string(),
                model_url: format!("{MODEL_BASE_URL}/mlc-chat-{id}/resolve/main/"),
            })
            .collect();
        let model_lib_map = KNOWN_MODELS
            .iter()
            .map(|id| (id.to_string(), format!("{LIB_BASE_URL}/{id}-webgpu.wasm")))
            .collect();
        Self {
            model_list,
            model_lib_map,
            use_cache: true,
        }
    }

    pub fn model_url(&self, model: &str) -> Option<&str> {
        self.model_list
            .iter()
            .find(|m| m.local_id == model)
            .map(|m| m.model_url.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLoad {
    pub model: String,
    pub app_config: AppConfig,
}

/// Merges the user's overrides into a fresh copy of the base template.
/// URL overrides only apply to models the template knows about.
pub fn resolve(web_model: &WebModelConfig) -> ResolvedLoad {
    let model = web_model
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let mut app_config = AppConfig::base();

    if let Some(url) = &web_model.urls.model
        && let Some(record) = app_config.model_list.iter_mut().find(|m| m.local_id == model)
    {
        record.model_url = url.clone();
    }
    if let Some(url) = &web_model.urls.wasm
        && let Some(lib) = app_config.model_lib_map.get_mut(&model)
    {
        *lib = url.clone();
    }
    if web_model.load.skip_cache {
        app_config.use_cache = false;
    }

    ResolvedLoad { model, app_config }
}
