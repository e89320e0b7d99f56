//! Runtime for executing conversation turns
//!
//! Drives the turn state machine against real storage and providers.

mod executor;
mod locks;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::TurnRuntime;
pub use traits::*;

use crate::db::{DbError, Message};
use crate::extract::Artifact;
use crate::state_machine::TurnErrorKind;
use std::sync::Arc;
use thiserror::Error;

/// Runtime the service runs: database storage, providers behind trait objects
pub type ProductionRuntime = TurnRuntime<DatabaseStorage, Arc<dyn CompletionClient>, Arc<dyn Transcriber>>;

/// Which conversation a turn runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTarget {
    /// An existing conversation
    Conversation(String),
    /// A fresh conversation created for this assistant
    Assistant(String),
}

/// The caller's new contribution
#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    File(Artifact),
}

/// A validated turn request
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub target: TurnTarget,
    /// `None` is fetch mode
    pub input: Option<TurnInput>,
}

impl TurnRequest {
    /// Validate raw request fields. Blank strings count as absent.
    pub fn new(
        conversation_id: Option<String>,
        assistant_id: Option<String>,
        message: Option<String>,
        file: Option<Artifact>,
    ) -> Result<Self, TurnError> {
        let conversation_id = conversation_id.filter(|s| !s.trim().is_empty());
        let assistant_id = assistant_id.filter(|s| !s.trim().is_empty());
        let message = message.filter(|s| !s.trim().is_empty());

        let target = match (conversation_id, assistant_id) {
            (Some(id), None) => TurnTarget::Conversation(id),
            (None, Some(id)) => TurnTarget::Assistant(id),
            (Some(_), Some(_)) => {
                return Err(TurnError::invalid_request(
                    "Provide either conversationId or assistantId, not both",
                ))
            }
            (None, None) => {
                return Err(TurnError::invalid_request(
                    "conversationId or assistantId is required",
                ))
            }
        };

        let input = match (message, file) {
            (Some(_), Some(_)) => {
                return Err(TurnError::invalid_request(
                    "Provide either a message or a file, not both",
                ))
            }
            (Some(text), None) => Some(TurnInput::Text(text)),
            (None, Some(artifact)) => Some(TurnInput::File(artifact)),
            (None, None) => None,
        };

        Ok(Self { target, input })
    }

    pub fn text(target: TurnTarget, text: impl Into<String>) -> Self {
        Self {
            target,
            input: Some(TurnInput::Text(text.into())),
        }
    }
}

/// Result of a successful invocation
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// A turn ran and the reply was persisted
    Replied { conversation_id: String, reply: String },
    /// Fetch mode: visible history, nothing written
    History {
        conversation_id: String,
        messages: Vec<Message>,
    },
}

impl TurnOutcome {
    pub fn conversation_id(&self) -> &str {
        match self {
            TurnOutcome::Replied { conversation_id, .. } | TurnOutcome::History { conversation_id, .. } => {
                conversation_id
            }
        }
    }
}

/// Turn failure with a stable kind
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TurnError {
    pub kind: TurnErrorKind,
    pub message: String,
}

impl TurnError {
    pub fn new(kind: TurnErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(TurnErrorKind::InvalidRequest, message)
    }
}

impl From<DbError> for TurnError {
    fn from(e: DbError) -> Self {
        let kind = match &e {
            DbError::ConversationNotFound(_) | DbError::AssistantNotFound(_) => TurnErrorKind::NotFound,
            DbError::InvalidAssistant(_) => TurnErrorKind::InvalidRequest,
            DbError::Sqlite(_) => TurnErrorKind::StorageError,
        };
        Self::new(kind, e.to_string())
    }
}
