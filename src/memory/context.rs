use super::{estimate_tokens, truncate_to_tokens};
use crate::research::parsing::normalize_key;
use crate::types::{Session, SubTaskStatus};

/// Maximum number of earlier turns considered for a follow-up query.
pub const MAX_PRIOR_TURNS: usize = 5;

/// Formats earlier completed turns of a conversation for a planning prompt.
///
/// Turns are kept newest first until the token budget is spent, then emitted
/// in chronological order. Each turn lists its query, the angles already
/// researched and the report summary.
pub fn format_conversation_context(prior: &[Session], token_budget: usize) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut total_tokens = 0;

    for session in prior.iter().rev().take(MAX_PRIOR_TURNS) {
        let block = format_turn(session);
        let block_tokens = estimate_tokens(&block);

        if total_tokens + block_tokens > token_budget {
            let remaining = token_budget.saturating_sub(total_tokens);
            // partial turn only if it still carries the query line
            if blocks.is_empty() && remaining > estimate_tokens(&session.query) + 8 {
                blocks.push(truncate_to_tokens(&block, remaining));
            }
            break;
        }
        blocks.push(block);
        total_tokens += block_tokens;
    }

    blocks.reverse();
    blocks.join("\n\n")
}

fn format_turn(session: &Session) -> String {
    let mut lines = vec![format!("Previous query: {}", session.query)];

    let completed: Vec<&str> = session
        .subtasks
        .iter()
        .filter(|t| t.status == SubTaskStatus::Done)
        .map(|t| t.goal.as_str())
        .collect();
    if !completed.is_empty() {
        lines.push("Already researched:".to_string());
        lines.extend(completed.iter().map(|g| format!("- {}", g)));
    }

    if let Some(ref report) = session.report
        && !report.summary.trim().is_empty()
    {
        lines.push(format!("Findings summary: {}", report.summary.trim()));
    }

    lines.join("\n")
}

/// The most recent earlier turn that asked the same question, if any.
///
/// Comparison ignores case and repeated whitespace.
pub fn find_repeated_turn<'a>(prior: &'a [Session], query: &str) -> Option<&'a Session> {
    let wanted = normalize_key(query);
    prior.iter().rev().find(|s| normalize_key(&s.query) == wanted)
}
