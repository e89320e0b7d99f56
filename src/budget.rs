//! Context budgeting
//!
//! Hard truncation of text before it crosses into storage or a provider call.
//! The input budget and the reply budget bound different resources and are
//! kept as separate constants.

/// Maximum whitespace-delimited tokens of user content placed in a prompt
pub const CONTEXT_BUDGET: usize = 32_000;

/// Maximum tokens requested for a provider reply
pub const MAX_REPLY_TOKENS: u32 = 1_000;

/// Keep at most `max_units` whitespace-delimited tokens, rejoined with single spaces.
pub fn truncate(text: &str, max_units: usize) -> String {
    text.split_whitespace()
        .take(max_units)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Number of whitespace-delimited tokens in `text`
pub fn unit_count(text: &str) -> usize {
    text.split_whitespace().count()
}
