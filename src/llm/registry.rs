//! Model registry for managing available LLM providers

use super::models::DEFAULT_MODEL_ID;
use super::transcription::{OpenAITranscriber, DEFAULT_TRANSCRIPTION_MODEL};
use super::{
    all_models, LlmService, LoggingService, ModelDef, ModelInfo, Provider, TranscriptionService,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for LLM providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub groq_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// `OpenAI`-compatible gateway that holds the provider credentials
    pub gateway: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
    pub transcription_model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            groq_api_key: non_empty_env("GROQ_API_KEY"),
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            gateway: non_empty_env("LLM_GATEWAY"),
            default_model: non_empty_env("DEFAULT_MODEL"),
            transcription_model: non_empty_env("TRANSCRIPTION_MODEL"),
        }
    }

    fn api_key(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Groq => self.groq_api_key.as_deref(),
            Provider::OpenAI => self.openai_api_key.as_deref(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
    transcriber: Option<Arc<dyn TranscriptionService>>,
}

impl ModelRegistry {
    /// Create an empty registry for testing purposes
    #[cfg(test)]
    pub fn new_empty() -> Self {
        Self {
            services: HashMap::new(),
            default_model: DEFAULT_MODEL_ID.to_string(),
            transcriber: None,
        }
    }

    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        for model_def in all_models() {
            if let Some(service) = Self::try_create_model(model_def, config) {
                services.insert(model_def.id.to_string(), service);
            }
        }

        let default_model = config
            .default_model
            .clone()
            .filter(|id| services.contains_key(id))
            .or_else(|| {
                if services.contains_key(DEFAULT_MODEL_ID) {
                    Some(DEFAULT_MODEL_ID.to_string())
                } else {
                    // Fall back to the first configured model in catalogue order
                    all_models()
                        .iter()
                        .find(|m| services.contains_key(m.id))
                        .map(|m| m.id.to_string())
                }
            })
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());

        Self {
            services,
            default_model,
            transcriber: Self::try_create_transcriber(config),
        }
    }

    /// Try to create a model service, validating prerequisites
    fn try_create_model(model_def: &ModelDef, config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
        // In gateway mode the gateway handles authentication
        let api_key = if config.gateway.is_some() {
            "implicit"
        } else {
            config.api_key(model_def.provider)?
        };

        match (model_def.factory)(model_def, api_key, config.gateway.as_deref()) {
            Ok(service) => Some(Arc::new(LoggingService::new(service))),
            Err(e) => {
                tracing::warn!(model = model_def.id, error = %e, "Model unavailable");
                None
            }
        }
    }

    fn try_create_transcriber(config: &LlmConfig) -> Option<Arc<dyn TranscriptionService>> {
        let model = config
            .transcription_model
            .clone()
            .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string());

        let (api_key, base_url) = match (&config.gateway, &config.openai_api_key) {
            (Some(gw), _) => ("implicit".to_string(), format!("{}/openai/v1", gw.trim_end_matches('/'))),
            (None, Some(key)) => (key.clone(), Provider::OpenAI.api_base().to_string()),
            (None, None) => return None,
        };

        match OpenAITranscriber::new(api_key, &base_url, model) {
            Ok(t) => Some(Arc::new(t)),
            Err(e) => {
                tracing::warn!(error = %e, "Transcription unavailable");
                None
            }
        }
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    /// Get the default model ID
    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    /// The requested model when it is configured, otherwise the default
    pub fn resolve_model_id(&self, requested: &str) -> String {
        if self.services.contains_key(requested) {
            requested.to_string()
        } else {
            self.default_model.clone()
        }
    }

    pub fn transcriber(&self) -> Option<Arc<dyn TranscriptionService>> {
        self.transcriber.clone()
    }

    /// List all available model IDs
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    /// Get detailed information about available models
    pub fn available_model_info(&self) -> Vec<ModelInfo> {
        all_models()
            .iter()
            .filter(|def| self.services.contains_key(def.id))
            .map(|def| ModelInfo {
                id: def.id.to_string(),
                provider: def.provider.display_name().to_string(),
                description: def.description.to_string(),
                context_window: def.context_window,
            })
            .collect()
    }

    /// Check if any models are available
    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }
}
