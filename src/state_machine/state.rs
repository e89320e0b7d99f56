//! Turn state types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnErrorKind {
    /// Missing or conflicting identifiers and fields
    InvalidRequest,
    /// Assistant or conversation id does not resolve
    NotFound,
    /// The extractor cannot decode the artifact
    UnsupportedFormat,
    /// Transcription or decoding failed
    ExtractionError,
    /// The completion call failed
    ProviderError,
    /// The persistence layer failed
    StorageError,
}

impl TurnErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::UnsupportedFormat => "unsupported_format",
            Self::ExtractionError => "extraction_error",
            Self::ProviderError => "provider_error",
            Self::StorageError => "storage_error",
        }
    }
}

impl fmt::Display for TurnErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller contributed once the conversation is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContributionKind {
    Text(String),
    /// Audio artifact, routed to transcription
    Audio { file_name: String },
    /// Document or text artifact, routed to the local decoder
    Document { file_name: String },
}

/// Per-turn limits, fixed for the lifetime of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnContext {
    /// Whitespace-token budget for the user contribution
    pub context_budget: usize,
    /// Reply-length cap passed to the provider
    pub max_reply_tokens: u32,
}

impl Default for TurnContext {
    fn default() -> Self {
        Self {
            context_budget: crate::budget::CONTEXT_BUDGET,
            max_reply_tokens: crate::budget::MAX_REPLY_TOKENS,
        }
    }
}

/// Turn state. Exists only for the duration of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnState {
    /// Loading or creating the conversation
    Resolving,

    /// Turning an artifact into text
    Extracting { file_name: String },

    /// Truncating the contribution to the context budget
    Budgeting { file_name: Option<String> },

    /// Persisting the user message; holds the final prompt entry
    Prompting { final_entry: String },

    /// Waiting on the provider
    Completing { user_message_id: String },

    /// Persisting the reply
    Persisting { user_message_id: String, reply: String },

    /// Turn finished; `reply` is `None` in fetch mode
    Done { reply: Option<String> },

    Failed { kind: TurnErrorKind, message: String },
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Done { .. } | TurnState::Failed { .. })
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Resolving => "resolving",
            TurnState::Extracting { .. } => "extracting",
            TurnState::Budgeting { .. } => "budgeting",
            TurnState::Prompting { .. } => "prompting",
            TurnState::Completing { .. } => "completing",
            TurnState::Persisting { .. } => "persisting",
            TurnState::Done { .. } => "done",
            TurnState::Failed { .. } => "failed",
        }
    }
}
