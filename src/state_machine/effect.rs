//! Effects produced by state transitions

use super::state::TurnErrorKind;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Return the conversation's visible history (fetch mode)
    ReturnHistory,

    /// Send the audio artifact to the transcription provider
    Transcribe,

    /// Decode the document artifact locally
    Decode,

    /// Truncate text to the context budget
    ApplyBudget { text: String, max_units: usize },

    /// Append the user contribution as a role=user message
    PersistUserMessage { content: String },

    /// Make the single completion call for this turn
    RequestCompletion {
        final_entry: String,
        max_reply_tokens: u32,
    },

    /// Append the reply as a role=assistant message
    PersistReply { content: String },

    /// Mark the user message as failed so readers can tell it apart from pending
    RecordFailure {
        user_message_id: String,
        kind: TurnErrorKind,
        detail: String,
    },
}
