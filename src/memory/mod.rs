//! Memory management for research sessions and conversation context.
//!
//! This module provides:
//! - [`MemoryStore`] - the keyed session store shared by every stage
//! - Conversation context formatting for follow-up queries
//! - Token estimation and truncation helpers used to respect context budgets

/// Formatting of earlier conversation turns for planning prompts.
pub mod context;
/// Session store, progress event log and snapshots.
pub mod store;

pub use context::{find_repeated_turn, format_conversation_context};
pub use store::{MemorySnapshot, MemoryStore, SessionRecord};

/// Estimates token count for a piece of text (rough approximation).
///
/// Uses a simple heuristic of ~4 characters per token for English text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Truncates text to fit within a token budget.
///
/// Cuts on a character boundary, preferring the last whitespace before the
/// limit, and appends an ellipsis when anything was removed.
pub fn truncate_to_tokens(text: &str, token_budget: usize) -> String {
    let max_bytes = token_budget.saturating_mul(4);
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let cut = &text[..end];
    let cut = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > end / 2 => &cut[..pos],
        _ => cut,
    };

    format!("{}…", cut.trim_end())
}
