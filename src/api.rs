//! HTTP API for the assistant hub

mod handlers;
mod types;
mod webhook;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::channel::{ChannelBridge, ChannelSender};
use crate::config::{AppConfig, WhatsAppConfig};
use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::runtime::{
    CompletionClient, DatabaseStorage, ProductionRuntime, RegistryCompletionClient, RegistryTranscriber,
    Transcriber, TurnRuntime,
};
use crate::state_machine::TurnContext;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub runtime: Arc<ProductionRuntime>,
    pub llm_registry: Arc<ModelRegistry>,
    pub bridge: Arc<ChannelBridge>,
    pub whatsapp: Arc<WhatsAppConfig>,
}

impl AppState {
    pub fn new(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        config: &AppConfig,
        sender: Arc<dyn ChannelSender>,
    ) -> Self {
        let completion: Arc<dyn CompletionClient> = Arc::new(RegistryCompletionClient::new(llm_registry.clone()));
        let transcriber: Arc<dyn Transcriber> = Arc::new(RegistryTranscriber::new(llm_registry.clone()));
        Self::with_clients(
            db,
            llm_registry,
            completion,
            transcriber,
            config.turn_context(),
            config.whatsapp.clone(),
            sender,
        )
    }

    /// Build state around explicit provider clients
    pub fn with_clients(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        completion: Arc<dyn CompletionClient>,
        transcriber: Arc<dyn Transcriber>,
        context: TurnContext,
        whatsapp: WhatsAppConfig,
        sender: Arc<dyn ChannelSender>,
    ) -> Self {
        let runtime = TurnRuntime::new(DatabaseStorage::new(db.clone()), completion, transcriber, context);
        let bridge = ChannelBridge::new(db.clone(), sender, whatsapp.reuse_conversations);
        Self {
            db,
            runtime: Arc::new(runtime),
            llm_registry,
            bridge: Arc::new(bridge),
            whatsapp: Arc::new(whatsapp),
        }
    }
}
