//! Turn executor

use super::locks::ConversationLocks;
use super::traits::{CompletionClient, ConversationStore, Transcriber};
use super::{TurnError, TurnInput, TurnOutcome, TurnRequest, TurnTarget};

use crate::budget;
use crate::db::{ConversationDetail, Message, Role};
use crate::extract::{self, Artifact, ContentClass, ExtractError};
use crate::llm::{LlmMessage, LlmRequest};
use crate::state_machine::{transition, ContributionKind, Effect, Event, TurnContext, TurnErrorKind, TurnState};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;

/// Everything a turn accumulates while its effects run
struct TurnScope {
    conversation: Option<ConversationDetail>,
    artifact: Option<Artifact>,
    model_id: String,
}

impl TurnScope {
    fn conversation_id(&self) -> &str {
        self.conversation
            .as_ref()
            .map_or("", |c| c.conversation.id.as_str())
    }
}

/// Generic turn runtime that can work with any storage, completion and transcription implementations
pub struct TurnRuntime<S, C, T>
where
    S: ConversationStore,
    C: CompletionClient,
    T: Transcriber,
{
    storage: S,
    completion: Arc<C>,
    transcriber: Arc<T>,
    context: TurnContext,
    locks: ConversationLocks,
}

impl<S, C, T> TurnRuntime<S, C, T>
where
    S: ConversationStore,
    C: CompletionClient,
    T: Transcriber,
{
    pub fn new(storage: S, completion: C, transcriber: T, context: TurnContext) -> Self {
        Self {
            storage,
            completion: Arc::new(completion),
            transcriber: Arc::new(transcriber),
            context,
            locks: ConversationLocks::new(),
        }
    }

    /// Run one turn to completion
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, TurnError> {
        let started = Instant::now();
        let TurnRequest { target, input } = request;

        let mut scope = TurnScope {
            conversation: None,
            artifact: None,
            model_id: String::new(),
        };

        // Held until this function returns
        let (first_event, _guard) = match self.resolve(&target).await {
            Ok((detail, guard)) => {
                scope.model_id = self.completion.resolve_model(&detail.assistant.model);
                scope.conversation = Some(detail);
                let contribution = input.map(|input| match input {
                    TurnInput::Text(text) => ContributionKind::Text(text),
                    TurnInput::File(artifact) => {
                        let file_name = artifact.name.clone();
                        let kind = if artifact.class() == ContentClass::Audio {
                            ContributionKind::Audio { file_name }
                        } else {
                            ContributionKind::Document { file_name }
                        };
                        scope.artifact = Some(artifact);
                        kind
                    }
                });
                (Event::Resolved { contribution }, Some(guard))
            }
            Err(e) => (
                Event::ResolutionFailed {
                    kind: e.kind,
                    message: e.message,
                },
                None,
            ),
        };

        let mut state = TurnState::Resolving;
        let mut pending = vec![first_event];

        while let Some(event) = pending.pop() {
            let result = transition(&state, &self.context, event).map_err(|e| {
                tracing::error!(conv_id = %scope.conversation_id(), error = %e, "Turn transition rejected");
                TurnError::new(TurnErrorKind::StorageError, format!("Turn aborted: {e}"))
            })?;

            tracing::debug!(
                conv_id = %scope.conversation_id(),
                from = state.name(),
                to = result.new_state.name(),
                "Turn transition"
            );
            state = result.new_state;

            for effect in result.effects {
                if let Some(next) = self.execute_effect(effect, &mut scope).await {
                    pending.push(next);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis();
        match state {
            TurnState::Done { reply: Some(reply) } => {
                tracing::info!(
                    conv_id = %scope.conversation_id(),
                    model = %scope.model_id,
                    duration_ms = %duration_ms,
                    "Turn completed"
                );
                Ok(TurnOutcome::Replied {
                    conversation_id: scope.conversation_id().to_string(),
                    reply,
                })
            }
            TurnState::Done { reply: None } => {
                let messages = scope
                    .conversation
                    .as_ref()
                    .map(ConversationDetail::visible_messages)
                    .unwrap_or_default();
                Ok(TurnOutcome::History {
                    conversation_id: scope.conversation_id().to_string(),
                    messages,
                })
            }
            TurnState::Failed { kind, message } => {
                tracing::warn!(
                    conv_id = %scope.conversation_id(),
                    kind = %kind,
                    error = %message,
                    duration_ms = %duration_ms,
                    "Turn failed"
                );
                Err(TurnError::new(kind, message))
            }
            other => Err(TurnError::new(
                TurnErrorKind::StorageError,
                format!("Turn stopped in state {}", other.name()),
            )),
        }
    }

    /// Clear a conversation back to its seed system message
    pub async fn clear(&self, conversation_id: &str) -> Result<Message, TurnError> {
        let _guard = self.locks.acquire(conversation_id).await;
        let seed = self.storage.clear_conversation(conversation_id).await?;
        tracing::info!(conv_id = %conversation_id, "Conversation cleared");
        Ok(seed)
    }

    /// Load or create the conversation and take its lock
    async fn resolve(&self, target: &TurnTarget) -> Result<(ConversationDetail, OwnedMutexGuard<()>), TurnError> {
        match target {
            TurnTarget::Conversation(id) => {
                let guard = self.locks.acquire(id).await;
                let detail = self.storage.get_conversation(id).await?;
                Ok((detail, guard))
            }
            TurnTarget::Assistant(assistant_id) => {
                let detail = self.storage.create_conversation(assistant_id).await?;
                tracing::info!(
                    conv_id = %detail.conversation.id,
                    assistant_id = %assistant_id,
                    "Created conversation"
                );
                let guard = self.locks.acquire(&detail.conversation.id).await;
                Ok((detail, guard))
            }
        }
    }

    async fn execute_effect(&self, effect: Effect, scope: &mut TurnScope) -> Option<Event> {
        match effect {
            Effect::ReturnHistory => None,

            Effect::Transcribe => {
                let Some(artifact) = scope.artifact.take() else {
                    return Some(missing_artifact());
                };
                let media_type = artifact.effective_media_type();
                match self
                    .transcriber
                    .transcribe(&artifact.name, &media_type, &artifact.bytes)
                    .await
                {
                    Ok(text) => Some(Event::Extracted { text }),
                    Err(e) => Some(Event::ExtractionFailed {
                        kind: TurnErrorKind::ExtractionError,
                        message: format!("Failed to transcribe audio: {e}"),
                    }),
                }
            }

            Effect::Decode => {
                let Some(artifact) = scope.artifact.take() else {
                    return Some(missing_artifact());
                };
                let decoded = tokio::task::spawn_blocking(move || extract::decode(&artifact)).await;
                Some(match decoded {
                    Ok(Ok(text)) => Event::Extracted { text },
                    Ok(Err(e)) => Event::ExtractionFailed {
                        kind: extraction_kind(&e),
                        message: e.to_string(),
                    },
                    Err(e) => Event::ExtractionFailed {
                        kind: TurnErrorKind::ExtractionError,
                        message: format!("Extraction task failed: {e}"),
                    },
                })
            }

            Effect::ApplyBudget { text, max_units } => {
                // Within budget the text is kept verbatim, line breaks included.
                let original = budget::unit_count(&text);
                if original <= max_units {
                    return Some(Event::Budgeted { text });
                }
                tracing::info!(
                    conv_id = %scope.conversation_id(),
                    original_units = original,
                    max_units,
                    "Contribution truncated to context budget"
                );
                Some(Event::Budgeted {
                    text: budget::truncate(&text, max_units),
                })
            }

            Effect::PersistUserMessage { content } => {
                let conversation_id = scope.conversation_id().to_string();
                Some(
                    match self
                        .storage
                        .append_message(&conversation_id, Role::User, &content)
                        .await
                    {
                        Ok(message) => Event::UserMessagePersisted { message_id: message.id },
                        Err(e) => Event::StorageFailed { message: e.to_string() },
                    },
                )
            }

            Effect::RequestCompletion {
                final_entry,
                max_reply_tokens,
            } => {
                let Some(detail) = scope.conversation.as_ref() else {
                    return Some(Event::StorageFailed {
                        message: "Conversation not loaded".to_string(),
                    });
                };
                let request = build_request(detail, final_entry, max_reply_tokens);
                Some(match self.completion.complete(&scope.model_id, &request).await {
                    Ok(response) => Event::CompletionReceived {
                        reply: response.usable_text().map(String::from),
                    },
                    Err(e) => Event::CompletionFailed { message: e.to_string() },
                })
            }

            Effect::PersistReply { content } => {
                let conversation_id = scope.conversation_id().to_string();
                Some(
                    match self
                        .storage
                        .append_message(&conversation_id, Role::Assistant, &content)
                        .await
                    {
                        Ok(_) => Event::ReplyPersisted,
                        Err(e) => Event::StorageFailed { message: e.to_string() },
                    },
                )
            }

            Effect::RecordFailure {
                user_message_id,
                kind,
                detail,
            } => {
                let conversation_id = scope.conversation_id().to_string();
                if let Err(e) = self
                    .storage
                    .record_turn_failure(&conversation_id, &user_message_id, kind.as_str(), &detail)
                    .await
                {
                    tracing::warn!(conv_id = %conversation_id, error = %e, "Failed to record turn failure");
                }
                None
            }
        }
    }
}

/// Assistant instructions as the system entry, prior turns in order, then the
/// new contribution. Stored system messages are the seed and are not repeated.
fn build_request(detail: &ConversationDetail, final_entry: String, max_reply_tokens: u32) -> LlmRequest {
    let mut messages: Vec<LlmMessage> = detail
        .messages
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(LlmMessage::user(m.content.clone())),
            Role::Assistant => Some(LlmMessage::assistant(m.content.clone())),
            Role::System => None,
        })
        .collect();
    messages.push(LlmMessage::user(final_entry));

    LlmRequest {
        system: detail.assistant.system_prompt().to_string(),
        messages,
        max_tokens: Some(max_reply_tokens),
    }
}

fn extraction_kind(e: &ExtractError) -> TurnErrorKind {
    if e.is_unsupported() {
        TurnErrorKind::UnsupportedFormat
    } else {
        TurnErrorKind::ExtractionError
    }
}

fn missing_artifact() -> Event {
    Event::ExtractionFailed {
        kind: TurnErrorKind::ExtractionError,
        message: "No file attached".to_string(),
    }
}
