//! Pure state transition function

use super::state::{ContributionKind, TurnContext, TurnErrorKind, TurnState};
use super::{Effect, Event};
use thiserror::Error;

/// Stored and returned when the provider produced no usable reply
pub const FALLBACK_REPLY: &str = "I'm sorry, I couldn't generate a response.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Turn already finished")]
    AlreadyFinished,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Stored form of a file contribution: keeps the artifact name with its text
pub fn file_message_content(file_name: &str, text: &str) -> String {
    format!("Uploaded file: {file_name}\n\nFile content:\n{text}")
}

/// Final prompt entry for a file contribution
pub fn file_analysis_prompt(text: &str) -> String {
    format!("Please analyze the following file content:\n\n{text}")
}

/// Pure transition function
///
/// Given the same state, context and event it always produces the same
/// result. All I/O is described by the returned effects.
pub fn transition(
    state: &TurnState,
    context: &TurnContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    if state.is_terminal() {
        return Err(TransitionError::AlreadyFinished);
    }

    match (state, event) {
        // ============================================================
        // Resolution
        // ============================================================
        (TurnState::Resolving, Event::Resolved { contribution: None }) => {
            Ok(TransitionResult::new(TurnState::Done { reply: None }).with_effect(Effect::ReturnHistory))
        }

        (TurnState::Resolving, Event::Resolved { contribution: Some(ContributionKind::Text(text)) }) => {
            Ok(TransitionResult::new(TurnState::Budgeting { file_name: None }).with_effect(
                Effect::ApplyBudget {
                    text,
                    max_units: context.context_budget,
                },
            ))
        }

        (TurnState::Resolving, Event::Resolved { contribution: Some(ContributionKind::Audio { file_name }) }) => {
            Ok(TransitionResult::new(TurnState::Extracting { file_name }).with_effect(Effect::Transcribe))
        }

        (TurnState::Resolving, Event::Resolved { contribution: Some(ContributionKind::Document { file_name }) }) => {
            Ok(TransitionResult::new(TurnState::Extracting { file_name }).with_effect(Effect::Decode))
        }

        (TurnState::Resolving, Event::ResolutionFailed { kind, message }) => {
            Ok(TransitionResult::new(TurnState::Failed { kind, message }))
        }

        // ============================================================
        // Extraction and budgeting
        // ============================================================
        (TurnState::Extracting { file_name }, Event::Extracted { text }) => Ok(TransitionResult::new(
            TurnState::Budgeting {
                file_name: Some(file_name.clone()),
            },
        )
        .with_effect(Effect::ApplyBudget {
            text,
            max_units: context.context_budget,
        })),

        (TurnState::Extracting { .. }, Event::ExtractionFailed { kind, message }) => {
            Ok(TransitionResult::new(TurnState::Failed { kind, message }))
        }

        (TurnState::Budgeting { file_name }, Event::Budgeted { text }) => {
            let (content, final_entry) = match file_name {
                Some(name) => (file_message_content(name, &text), file_analysis_prompt(&text)),
                None => (text.clone(), text),
            };
            Ok(TransitionResult::new(TurnState::Prompting { final_entry })
                .with_effect(Effect::PersistUserMessage { content }))
        }

        // ============================================================
        // Completion
        // ============================================================
        (TurnState::Prompting { final_entry }, Event::UserMessagePersisted { message_id }) => {
            Ok(TransitionResult::new(TurnState::Completing {
                user_message_id: message_id,
            })
            .with_effect(Effect::RequestCompletion {
                final_entry: final_entry.clone(),
                max_reply_tokens: context.max_reply_tokens,
            }))
        }

        (TurnState::Completing { user_message_id }, Event::CompletionReceived { reply }) => {
            let reply = reply
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_REPLY.to_string());
            Ok(TransitionResult::new(TurnState::Persisting {
                user_message_id: user_message_id.clone(),
                reply: reply.clone(),
            })
            .with_effect(Effect::PersistReply { content: reply }))
        }

        (TurnState::Completing { user_message_id }, Event::CompletionFailed { message }) => {
            Ok(TransitionResult::new(TurnState::Failed {
                kind: TurnErrorKind::ProviderError,
                message: message.clone(),
            })
            .with_effect(Effect::RecordFailure {
                user_message_id: user_message_id.clone(),
                kind: TurnErrorKind::ProviderError,
                detail: message,
            }))
        }

        (TurnState::Persisting { reply, .. }, Event::ReplyPersisted) => Ok(TransitionResult::new(TurnState::Done {
            reply: Some(reply.clone()),
        })),

        // ============================================================
        // Storage failures
        // ============================================================

        // Once the user message exists, a storage failure still marks it failed
        (
            TurnState::Completing { user_message_id } | TurnState::Persisting { user_message_id, .. },
            Event::StorageFailed { message },
        ) => Ok(TransitionResult::new(TurnState::Failed {
            kind: TurnErrorKind::StorageError,
            message: message.clone(),
        })
        .with_effect(Effect::RecordFailure {
            user_message_id: user_message_id.clone(),
            kind: TurnErrorKind::StorageError,
            detail: message,
        })),

        (_, Event::StorageFailed { message }) => Ok(TransitionResult::new(TurnState::Failed {
            kind: TurnErrorKind::StorageError,
            message,
        })),

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {}",
            state.name()
        ))),
    }
}
