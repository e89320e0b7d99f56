//! Centralized model definitions
//!
//! Every model the hub can route a turn to is listed here. Both providers
//! speak the `OpenAI` chat-completions protocol.

use super::{LlmService, OpenAIService};
use std::sync::Arc;

/// Model used when an assistant names a model the registry cannot serve
pub const DEFAULT_MODEL_ID: &str = "llama-3.3-70b-versatile";

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Groq,
    OpenAI,
}

impl Provider {
    /// Get the display name for this provider
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Groq => "Groq",
            Provider::OpenAI => "OpenAI",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Groq => "GROQ_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }

    /// Direct API base URL
    pub fn api_base(self) -> &'static str {
        match self {
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::OpenAI => "https://api.openai.com/v1",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID, as stored on assistants
    pub id: &'static str,
    pub provider: Provider,
    /// API name used by the provider
    pub api_name: &'static str,
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Factory function to create the service
    pub factory: fn(&ModelDef, &str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn openai_compatible(
    def: &ModelDef,
    api_key: &str,
    gateway: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    // Accept any non-empty key (including "implicit" for gateway mode)
    if api_key.is_empty() {
        return Err(format!(
            "{} requires {} or gateway",
            def.id,
            def.provider.api_key_env_var()
        ));
    }
    Ok(Arc::new(OpenAIService::new(api_key.to_string(), def, gateway)?))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        // Groq models
        ModelDef {
            id: "llama-3.3-70b-versatile",
            provider: Provider::Groq,
            api_name: "llama-3.3-70b-versatile",
            description: "Llama 3.3 70B on Groq (default, largest context)",
            context_window: 128_000,
            factory: openai_compatible,
        },
        ModelDef {
            id: "llama-3.1-8b-instant",
            provider: Provider::Groq,
            api_name: "llama-3.1-8b-instant",
            description: "Llama 3.1 8B on Groq (fast)",
            context_window: 128_000,
            factory: openai_compatible,
        },
        // OpenAI models
        ModelDef {
            id: "gpt-4o",
            provider: Provider::OpenAI,
            api_name: "gpt-4o",
            description: "GPT-4o (OpenAI flagship)",
            context_window: 128_000,
            factory: openai_compatible,
        },
        ModelDef {
            id: "gpt-4o-mini",
            provider: Provider::OpenAI,
            api_name: "gpt-4o-mini",
            description: "GPT-4o mini (fast, cheap)",
            context_window: 128_000,
            factory: openai_compatible,
        },
    ]
}
