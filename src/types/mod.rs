//! Core types shared by every stage of the research pipeline.
//!
//! - [`session`] - sessions, sub-tasks, documents and findings
//! - [`report`] - the synthesized report and its metadata
//! - [`events`] - the progress event log surfaced to callers
//!
//! Errors live here as well so that stages, capabilities and the store all
//! speak the same taxonomy.

/// Progress events and stage/phase markers.
pub mod events;
/// Report sections, citations and warnings.
pub mod report;
/// Sessions, sub-tasks, documents and findings.
pub mod session;

pub use events::{Phase, ProgressEvent, ProgressUpdate, Stage};
pub use report::{Report, ReportMetadata, ReportSection, ReportWarning, SourceRef, WarningKind};
pub use session::{
    Confidence, Document, Findings, Insight, NO_SOURCE_TAG, ResearchPlan, Session, SessionStatus,
    SubTask, SubTaskStatus,
};

// ============= Error Types =============

/// Errors produced anywhere in the research pipeline.
///
/// The first three variants are transient capability failures and are retried
/// with backoff; everything else is either handled by a stage fallback or is
/// fatal to the operation that raised it.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Malformed output: {0}")]
    MalformedOutput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session {0} is closed")]
    SessionClosed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResearchError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResearchError::Timeout(_) | ResearchError::RateLimited(_) | ResearchError::Unavailable(_)
        )
    }

    /// Classify a provider error message the way HTTP APIs report them.
    ///
    /// Rate limits and 5xx responses become transient errors, anything else
    /// is treated as an invalid response.
    pub fn from_provider_message(provider: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let text = format!("{} error: {}", provider, message);

        if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
            ResearchError::RateLimited(text)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            ResearchError::Timeout(text)
        } else if lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
            || lower.contains("connection")
            || lower.contains("unavailable")
            || lower.contains("bad gateway")
        {
            ResearchError::Unavailable(text)
        } else {
            ResearchError::InvalidResponse(text)
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ResearchError>;
