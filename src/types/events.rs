use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Session lifecycle transitions
    Session,
    /// Conversation memory lookups
    Memory,
    Planning,
    Retrieval,
    Analysis,
    Report,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Session => "session",
            Stage::Memory => "memory",
            Stage::Planning => "planning",
            Stage::Retrieval => "retrieval",
            Stage::Analysis => "analysis",
            Stage::Report => "report",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Started => "started",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// An event as emitted by a stage, before the store assigns it a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub phase: Phase,
    pub subtask_id: Option<String>,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    /// Marks the session's final event; the store closes the log after it
    pub terminal: bool,
}

impl ProgressUpdate {
    pub fn new(stage: Stage, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            stage,
            phase,
            subtask_id: None,
            message: message.into(),
            payload: None,
            terminal: false,
        }
    }

    pub fn started(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Phase::Started, message)
    }

    pub fn completed(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Phase::Completed, message)
    }

    pub fn failed(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, Phase::Failed, message)
    }

    pub fn for_subtask(mut self, subtask_id: impl Into<String>) -> Self {
        self.subtask_id = Some(subtask_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// A unit of the per-session progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    /// Strictly increasing and gap-free within a session, starting at 1
    pub seq: u64,
    pub stage: Stage,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub terminal: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub(crate) fn from_update(session_id: &str, seq: u64, update: ProgressUpdate) -> Self {
        Self {
            session_id: session_id.to_string(),
            seq,
            stage: update.stage,
            phase: update.phase,
            subtask_id: update.subtask_id,
            message: update.message,
            payload: update.payload,
            terminal: update.terminal,
            timestamp: Utc::now(),
        }
    }
}
