//! Assistant Hub - conversation service for configurable AI assistants
//!
//! Persists assistants, conversations and messages, runs chat turns against
//! an LLM provider, and bridges a WhatsApp Business number into the same
//! turn pipeline.

mod api;
mod budget;
mod channel;
mod config;
mod db;
mod extract;
mod llm;
mod runtime;
mod state_machine;

use api::{create_router, AppState};
use channel::WhatsAppSender;
use config::AppConfig;
use db::Database;
use llm::{LlmConfig, ModelRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assistant_hub=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            transcription = llm_registry.transcriber().is_some(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API keys configured. Set GROQ_API_KEY, OPENAI_API_KEY or LLM_GATEWAY.");
    }

    let sender = WhatsAppSender::new(
        config.whatsapp.access_token.clone(),
        config.whatsapp.phone_number_id.as_deref(),
    )?;
    if !sender.is_configured() {
        tracing::warn!("WhatsApp replies disabled. Set WHATSAPP_ACCESS_TOKEN and WHATSAPP_PHONE_NUMBER_ID.");
    }

    tracing::info!(
        context_budget = config.context_budget,
        max_reply_tokens = config.max_reply_tokens,
        reuse_channel_conversations = config.whatsapp.reuse_conversations,
        "Turn limits configured"
    );

    let state = AppState::new(db, llm_registry, &config, Arc::new(sender));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Assistant Hub listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
