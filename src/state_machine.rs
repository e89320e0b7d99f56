//! Turn state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions. The
//! runtime executes the effects and feeds the resulting events back in.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ContributionKind, TurnContext, TurnErrorKind, TurnState};
pub use transition::{transition, FALLBACK_REPLY};
