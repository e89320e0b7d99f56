//! Property-based tests for the turn state machine
//!
//! Random event sequences are fed through `transition`; rejected events leave
//! the state unchanged, as they do in the runtime.

use super::state::*;
use super::*;
use proptest::prelude::*;

fn test_context() -> TurnContext {
    TurnContext {
        context_budget: 32_000,
        max_reply_tokens: 1_000,
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_resolution_error() -> impl Strategy<Value = TurnErrorKind> {
    prop_oneof![
        Just(TurnErrorKind::InvalidRequest),
        Just(TurnErrorKind::NotFound),
        Just(TurnErrorKind::StorageError),
    ]
}

fn arb_extraction_error() -> impl Strategy<Value = TurnErrorKind> {
    prop_oneof![
        Just(TurnErrorKind::UnsupportedFormat),
        Just(TurnErrorKind::ExtractionError),
    ]
}

fn arb_contribution() -> impl Strategy<Value = Option<ContributionKind>> {
    prop_oneof![
        Just(None),
        "[a-z ]{0,20}".prop_map(|t| Some(ContributionKind::Text(t))),
        "[a-z]{1,8}".prop_map(|n| Some(ContributionKind::Audio {
            file_name: format!("{n}.mp3")
        })),
        "[a-z]{1,8}".prop_map(|n| Some(ContributionKind::Document {
            file_name: format!("{n}.docx")
        })),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_contribution().prop_map(|contribution| Event::Resolved { contribution }),
        (arb_resolution_error(), "[a-z]{0,10}").prop_map(|(kind, message)| Event::ResolutionFailed { kind, message }),
        "[a-z ]{0,30}".prop_map(|text| Event::Extracted { text }),
        (arb_extraction_error(), "[a-z]{0,10}").prop_map(|(kind, message)| Event::ExtractionFailed { kind, message }),
        "[a-z ]{0,30}".prop_map(|text| Event::Budgeted { text }),
        "[a-f0-9]{8}".prop_map(|message_id| Event::UserMessagePersisted { message_id }),
        Just(Event::ReplyPersisted),
        "[a-z]{0,10}".prop_map(|message| Event::StorageFailed { message }),
        proptest::option::of("[a-z ]{0,20}").prop_map(|reply| Event::CompletionReceived { reply }),
        "[a-z]{0,10}".prop_map(|message| Event::CompletionFailed { message }),
    ]
}

fn run(events: Vec<Event>) -> (TurnState, Vec<Effect>) {
    let ctx = test_context();
    let mut state = TurnState::Resolving;
    let mut effects = Vec::new();
    for event in events {
        if let Ok(result) = transition(&state, &ctx, event) {
            state = result.new_state;
            effects.extend(result.effects);
        }
    }
    (state, effects)
}

fn count(effects: &[Effect], pred: impl Fn(&Effect) -> bool) -> usize {
    effects.iter().filter(|e| pred(e)).count()
}

fn position(effects: &[Effect], pred: impl Fn(&Effect) -> bool) -> Option<usize> {
    effects.iter().position(pred)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// At most one completion call, one user message and one reply per turn
    #[test]
    fn prop_single_completion_per_turn(events in proptest::collection::vec(arb_event(), 0..30)) {
        let (_, effects) = run(events);
        let calls = count(&effects, |e| matches!(e, Effect::RequestCompletion { .. }));
        let user_messages = count(&effects, |e| matches!(e, Effect::PersistUserMessage { .. }));
        let replies = count(&effects, |e| matches!(e, Effect::PersistReply { .. }));
        prop_assert!(calls <= 1);
        prop_assert!(user_messages <= 1);
        prop_assert!(replies <= 1);
    }

    /// A reply is only persisted after the user message and the completion call
    #[test]
    fn prop_reply_follows_user_message_and_completion(events in proptest::collection::vec(arb_event(), 0..30)) {
        let (_, effects) = run(events);
        if let Some(reply_at) = position(&effects, |e| matches!(e, Effect::PersistReply { .. })) {
            let user_at = position(&effects, |e| matches!(e, Effect::PersistUserMessage { .. }));
            let call_at = position(&effects, |e| matches!(e, Effect::RequestCompletion { .. }));
            prop_assert!(user_at.is_some_and(|u| u < reply_at));
            prop_assert!(call_at.is_some_and(|c| c < reply_at));
        }
    }

    /// A provider failure never leaves an assistant message behind
    #[test]
    fn prop_provider_failure_persists_no_reply(events in proptest::collection::vec(arb_event(), 0..30)) {
        let (state, effects) = run(events);
        if matches!(state, TurnState::Failed { kind: TurnErrorKind::ProviderError, .. }) {
            prop_assert_eq!(count(&effects, |e| matches!(e, Effect::PersistReply { .. })), 0);
            prop_assert_eq!(count(&effects, |e| matches!(e, Effect::RecordFailure { .. })), 1);
        }
    }

    /// Extraction or resolution failures happen before anything is persisted
    #[test]
    fn prop_early_failures_have_no_side_effects(events in proptest::collection::vec(arb_event(), 0..30)) {
        let (state, effects) = run(events);
        if let TurnState::Failed { kind, .. } = &state {
            if *kind != TurnErrorKind::ProviderError && *kind != TurnErrorKind::StorageError {
                prop_assert_eq!(count(&effects, |e| matches!(e, Effect::PersistUserMessage { .. })), 0);
            }
        }
    }

    /// A finished turn always carries a non-blank reply
    #[test]
    fn prop_done_reply_is_never_blank(events in proptest::collection::vec(arb_event(), 0..30)) {
        let (state, _) = run(events);
        if let TurnState::Done { reply: Some(reply) } = state {
            prop_assert!(!reply.trim().is_empty());
        }
    }

    /// Every budgeting step uses the context budget, never the reply budget
    #[test]
    fn prop_budgets_are_not_conflated(events in proptest::collection::vec(arb_event(), 0..30)) {
        let ctx = test_context();
        let (_, effects) = run(events);
        for effect in &effects {
            match effect {
                Effect::ApplyBudget { max_units, .. } => prop_assert_eq!(*max_units, ctx.context_budget),
                Effect::RequestCompletion { max_reply_tokens, .. } => {
                    prop_assert_eq!(*max_reply_tokens, ctx.max_reply_tokens);
                }
                _ => {}
            }
        }
    }

    /// Terminal states accept no further events
    #[test]
    fn prop_terminal_states_are_absorbing(
        events in proptest::collection::vec(arb_event(), 0..30),
        extra in arb_event(),
    ) {
        let (state, _) = run(events);
        if state.is_terminal() {
            prop_assert!(transition(&state, &test_context(), extra).is_err());
        }
    }
}
