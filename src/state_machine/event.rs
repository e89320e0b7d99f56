//! Events that can occur during a turn

use super::state::{ContributionKind, TurnErrorKind};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Resolution
    Resolved {
        /// `None` means fetch mode: return history, no turn
        contribution: Option<ContributionKind>,
    },
    ResolutionFailed {
        kind: TurnErrorKind,
        message: String,
    },

    // Extraction
    Extracted {
        text: String,
    },
    ExtractionFailed {
        kind: TurnErrorKind,
        message: String,
    },

    Budgeted {
        text: String,
    },

    // Persistence
    UserMessagePersisted {
        message_id: String,
    },
    ReplyPersisted,
    StorageFailed {
        message: String,
    },

    // Provider
    CompletionReceived {
        /// Reply text when the provider produced something usable
        reply: Option<String>,
    },
    CompletionFailed {
        message: String,
    },
}
