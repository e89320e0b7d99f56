//! Process configuration from environment variables

use crate::budget::{CONTEXT_BUDGET, MAX_REPLY_TOKENS};
use crate::state_machine::TurnContext;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8000;

/// Top-level service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    /// Whitespace tokens allowed into a prompt per contribution
    pub context_budget: usize,
    /// Reply length cap passed to the provider
    pub max_reply_tokens: u32,
    pub whatsapp: WhatsAppConfig,
}

/// Messaging bridge settings
#[derive(Debug, Clone, Default)]
pub struct WhatsAppConfig {
    pub verify_token: Option<String>,
    pub app_secret: Option<String>,
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    /// Keep one conversation per sender address instead of one per message
    pub reuse_conversations: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let db_path = var("ASSISTANT_HUB_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".assistant-hub").join("assistant-hub.db")
            },
            PathBuf::from,
        );

        Self {
            db_path,
            port: parse_or(var("ASSISTANT_HUB_PORT"), DEFAULT_PORT),
            context_budget: parse_or(var("CONTEXT_BUDGET"), CONTEXT_BUDGET),
            max_reply_tokens: parse_or(var("MAX_REPLY_TOKENS"), MAX_REPLY_TOKENS),
            whatsapp: WhatsAppConfig {
                verify_token: var("WHATSAPP_VERIFY_TOKEN"),
                app_secret: var("WHATSAPP_APP_SECRET"),
                access_token: var("WHATSAPP_ACCESS_TOKEN"),
                phone_number_id: var("WHATSAPP_PHONE_NUMBER_ID"),
                reuse_conversations: var("WHATSAPP_REUSE_CONVERSATIONS")
                    .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
            },
        }
    }

    pub fn turn_context(&self) -> TurnContext {
        TurnContext {
            context_budget: self.context_budget,
            max_reply_tokens: self.max_reply_tokens,
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = %raw, "Ignoring unparseable setting");
            default
        }),
        None => default,
    }
}
