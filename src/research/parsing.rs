//! Structured-output contracts for generated text.
//!
//! Models are asked for a JSON object; when they answer with prose around it,
//! wrap it in code fences or fall back to a numbered list, these helpers
//! recover what they can. Anything unrecoverable is a
//! [`ResearchError::MalformedOutput`], which the stages answer with one
//! re-prompt and then their degraded output.

use crate::types::{ResearchError, Result};
use serde::de::DeserializeOwned;

/// The JSON object embedded in `text`: from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Deserialize the JSON object embedded in a model response.
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T> {
    let json = extract_json(text)
        .ok_or_else(|| ResearchError::MalformedOutput("response contains no JSON object".to_string()))?;
    serde_json::from_str(json)
        .map_err(|e| ResearchError::MalformedOutput(format!("response JSON does not match: {}", e)))
}

/// Items of a numbered or bulleted list, markers stripped.
///
/// Lines without a list marker are ignored unless the response has no
/// marked lines at all, in which case every non-empty line is an item.
pub fn parse_list_items(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .collect();

    let marked: Vec<String> = lines.iter().filter_map(|l| strip_list_marker(l)).collect();
    let items = if marked.is_empty() {
        lines.iter().map(|l| l.to_string()).collect()
    } else {
        marked
    };

    items
        .into_iter()
        .map(|item| clean_item(&item))
        .filter(|item| !item.is_empty())
        .collect()
}

fn strip_list_marker(line: &str) -> Option<String> {
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest.to_string());
        }
    }

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .or_else(|| rest.strip_prefix(": "))
        .map(str::to_string)
}

fn clean_item(item: &str) -> String {
    item.trim()
        .trim_matches(|c| c == '*' || c == '"' || c == '`')
        .trim()
        .to_string()
}

/// Collapse whitespace and compare case-insensitively.
pub fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Source references like `[S3]` or `S3` resolved to 1-based indices.
pub fn parse_source_label(label: &str) -> Option<usize> {
    let trimmed = label.trim().trim_start_matches('[').trim_end_matches(']').trim();
    let digits = trimmed
        .strip_prefix('S')
        .or_else(|| trimmed.strip_prefix('s'))
        .unwrap_or(trimmed);
    digits.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
