use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use super::{Report, ResearchError};

/// Tag carried by insights produced without any supporting document.
pub const NO_SOURCE_TAG: &str = "no-source";

// ============= Status Types =============

/// Lifecycle of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Planning,
    Researching,
    Synthesizing,
    Complete,
    Failed,
}

impl SessionStatus {
    /// Complete and Failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Planning => 0,
            SessionStatus::Researching => 1,
            SessionStatus::Synthesizing => 2,
            SessionStatus::Complete => 3,
            SessionStatus::Failed => 4,
        }
    }

    /// Transitions only move forward; Failed is reachable from any
    /// non-terminal state and nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SessionStatus::Failed => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Planning => "planning",
            SessionStatus::Researching => "researching",
            SessionStatus::Synthesizing => "synthesizing",
            SessionStatus::Complete => "complete",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle of a single sub-task pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Retrieving,
    Analyzing,
    Done,
    Failed,
}

impl SubTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubTaskStatus::Done | SubTaskStatus::Failed)
    }
}

// ============= Retrieval Types =============

/// A retrieved source document. Immutable once retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// URL or corpus id; unique within a sub-task
    pub source_id: String,
    pub title: String,
    /// Raw or excerpted content
    pub content: String,
    /// Higher is more relevant
    pub relevance_score: f32,
}

impl Document {
    pub fn new(
        source_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        relevance_score: f32,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            content: content.into(),
            relevance_score,
        }
    }
}

// ============= Analysis Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

impl FromStr for Confidence {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" | "strong" => Ok(Self::High),
            "medium" | "moderate" | "med" => Ok(Self::Medium),
            "low" | "weak" => Ok(Self::Low),
            other => Err(ResearchError::MalformedOutput(format!(
                "Unknown confidence level: {}",
                other
            ))),
        }
    }
}

/// A single extracted insight tied to its supporting documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub text: String,
    /// Source ids of supporting documents in the same sub-task
    pub sources: Vec<String>,
    pub confidence: Confidence,
    /// Optional category tag ("trend", "statistic", "no-source", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Insight {
    /// An insight with no supporting documents, always low confidence.
    pub fn no_source(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
            confidence: Confidence::Low,
            tag: Some(NO_SOURCE_TAG.to_string()),
        }
    }

    pub fn is_no_source(&self) -> bool {
        self.tag.as_deref() == Some(NO_SOURCE_TAG)
    }
}

/// Structured output of the analysis stage for one sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Findings {
    pub summary: String,
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub information_gaps: Vec<String>,
    /// Non-fatal problems found while parsing the analysis
    #[serde(default)]
    pub warnings: Vec<String>,
    /// True when produced by the mechanical fallback
    #[serde(default)]
    pub degraded: bool,
}

impl Findings {
    /// Findings for a sub-task whose retrieval came back empty.
    pub fn insufficient_information(goal: &str) -> Self {
        Self {
            summary: format!("Insufficient information was retrieved for: {}", goal),
            insights: vec![Insight::no_source(format!(
                "No source documents were found for \"{}\"; this angle remains unresearched.",
                goal
            ))],
            information_gaps: vec![goal.to_string()],
            warnings: Vec::new(),
            degraded: false,
        }
    }

    /// Every referenced source id, deduplicated in first-seen order.
    pub fn cited_sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.insights
            .iter()
            .flat_map(|i| i.sources.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }
}

// ============= Planning Types =============

/// Output of the planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResearchPlan {
    #[serde(default)]
    pub query_analysis: String,
    #[serde(default)]
    pub context: String,
    /// Ordered sub-task goals
    pub goals: Vec<String>,
    #[serde(default)]
    pub approach: String,
    /// True when the plan is the raw-query fallback
    #[serde(default)]
    pub degraded: bool,
}

impl ResearchPlan {
    /// The mandatory fallback: a single goal equal to the query verbatim.
    pub fn fallback(query: &str) -> Self {
        Self {
            query_analysis: String::new(),
            context: String::new(),
            goals: vec![query.to_string()],
            approach: String::new(),
            degraded: true,
        }
    }
}

// ============= Session Types =============

/// One decomposed research angle within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    /// Owning session (lookup only)
    pub session_id: String,
    pub goal: String,
    pub status: SubTaskStatus,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub findings: Option<Findings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubTask {
    pub fn new(session_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: format!("task_{}", Uuid::new_v4().simple()),
            session_id: session_id.into(),
            goal: goal.into(),
            status: SubTaskStatus::Pending,
            documents: Vec::new(),
            findings: None,
            error: None,
        }
    }
}

/// One end-to-end research request and its accumulated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub plan: Option<ResearchPlan>,
    #[serde(default)]
    pub subtasks: Vec<SubTask>,
    #[serde(default)]
    pub report: Option<Report>,
}

impl Session {
    pub fn new(query: impl Into<String>, conversation_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            query: query.into(),
            created_at: now,
            updated_at: now,
            status: SessionStatus::Planning,
            failure_reason: None,
            plan: None,
            subtasks: Vec::new(),
            report: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn subtask(&self, id: &str) -> Option<&SubTask> {
        self.subtasks.iter().find(|t| t.id == id)
    }

    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut SubTask> {
        self.subtasks.iter_mut().find(|t| t.id == id)
    }

    /// Source ids of every document held by any sub-task.
    pub fn known_sources(&self) -> HashSet<&str> {
        self.subtasks
            .iter()
            .flat_map(|t| t.documents.iter().map(|d| d.source_id.as_str()))
            .collect()
    }

    /// True once every sub-task reached Done or Failed.
    pub fn research_settled(&self) -> bool {
        self.subtasks.iter().all(|t| t.status.is_terminal())
    }
}
