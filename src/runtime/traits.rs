//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{ConversationDetail, Database, DbResult, Message, Role};
use crate::llm::{LlmError, LlmRequest, LlmResponse, ModelRegistry};
use async_trait::async_trait;
use std::sync::Arc;

/// Conversation persistence as seen by the turn runtime
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation and its seed system message
    async fn create_conversation(&self, assistant_id: &str) -> DbResult<ConversationDetail>;

    /// Conversation with owning assistant and ordered messages
    async fn get_conversation(&self, conversation_id: &str) -> DbResult<ConversationDetail>;

    async fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> DbResult<Message>;

    /// Delete all messages and re-seed the system message
    async fn clear_conversation(&self, conversation_id: &str) -> DbResult<Message>;

    async fn record_turn_failure(
        &self,
        conversation_id: &str,
        message_id: &str,
        kind: &str,
        detail: &str,
    ) -> DbResult<()>;
}

/// Client for making completion requests
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model a turn should use given the assistant's configured model
    fn resolve_model(&self, requested: &str) -> String;

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Speech-to-text for audio artifacts
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, file_name: &str, media_type: &str, audio: &[u8]) -> Result<String, LlmError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn create_conversation(&self, assistant_id: &str) -> DbResult<ConversationDetail> {
        (**self).create_conversation(assistant_id).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> DbResult<ConversationDetail> {
        (**self).get_conversation(conversation_id).await
    }

    async fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> DbResult<Message> {
        (**self).append_message(conversation_id, role, content).await
    }

    async fn clear_conversation(&self, conversation_id: &str) -> DbResult<Message> {
        (**self).clear_conversation(conversation_id).await
    }

    async fn record_turn_failure(
        &self,
        conversation_id: &str,
        message_id: &str,
        kind: &str,
        detail: &str,
    ) -> DbResult<()> {
        (**self)
            .record_turn_failure(conversation_id, message_id, kind, detail)
            .await
    }
}

#[async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for Arc<T> {
    fn resolve_model(&self, requested: &str) -> String {
        (**self).resolve_model(requested)
    }

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(model_id, request).await
    }
}

#[async_trait]
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    async fn transcribe(&self, file_name: &str, media_type: &str, audio: &[u8]) -> Result<String, LlmError> {
        (**self).transcribe(file_name, media_type, audio).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as `ConversationStore`
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStorage {
    async fn create_conversation(&self, assistant_id: &str) -> DbResult<ConversationDetail> {
        self.db.create_conversation(assistant_id)
    }

    async fn get_conversation(&self, conversation_id: &str) -> DbResult<ConversationDetail> {
        self.db.get_conversation(conversation_id)
    }

    async fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> DbResult<Message> {
        self.db.append_message(conversation_id, role, content)
    }

    async fn clear_conversation(&self, conversation_id: &str) -> DbResult<Message> {
        self.db.clear_conversation(conversation_id)
    }

    async fn record_turn_failure(
        &self,
        conversation_id: &str,
        message_id: &str,
        kind: &str,
        detail: &str,
    ) -> DbResult<()> {
        self.db
            .record_turn_failure(conversation_id, message_id, kind, detail)
    }
}

/// Adapter to use `ModelRegistry` as `CompletionClient`
pub struct RegistryCompletionClient {
    registry: Arc<ModelRegistry>,
}

impl RegistryCompletionClient {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl CompletionClient for RegistryCompletionClient {
    fn resolve_model(&self, requested: &str) -> String {
        self.registry.resolve_model_id(requested)
    }

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let llm = self
            .registry
            .get(model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| {
                LlmError::not_configured("No LLM available (set GROQ_API_KEY, OPENAI_API_KEY or LLM_GATEWAY)")
            })?;
        llm.complete(request).await
    }
}

/// Adapter to use the registry's transcription service as `Transcriber`
pub struct RegistryTranscriber {
    registry: Arc<ModelRegistry>,
}

impl RegistryTranscriber {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Transcriber for RegistryTranscriber {
    async fn transcribe(&self, file_name: &str, media_type: &str, audio: &[u8]) -> Result<String, LlmError> {
        let service = self.registry.transcriber().ok_or_else(|| {
            LlmError::not_configured("Audio transcription requires OPENAI_API_KEY or LLM_GATEWAY")
        })?;
        service.transcribe(file_name, media_type, audio).await
    }
}
