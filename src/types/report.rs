use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// A section of the synthesized report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub body: String,
    /// Document source ids cited by this section
    #[serde(default)]
    pub citations: Vec<String>,
    /// Sub-task this section covers, when it maps to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
}

/// A cited source listed at the end of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A citation did not resolve to any retrieved document and was removed
    DroppedCitation,
    /// A completed sub-task had no section and one was assembled mechanically
    MissingSection,
    /// A sub-task failed and contributes nothing to the report
    FailedSubtask,
    /// The plan fell back to the raw query
    DegradedPlan,
    /// Findings were produced by the analysis fallback
    DegradedAnalysis,
    /// Findings include low-confidence or unsourced insights
    LowConfidence,
    /// The whole report was assembled mechanically from findings
    MechanicalReport,
}

/// A non-fatal problem recorded while producing the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWarning {
    pub kind: WarningKind,
    pub message: String,
}

impl ReportWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default)]
    pub warnings: Vec<ReportWarning>,
    /// True when the report is the mechanical fallback
    #[serde(default)]
    pub degraded: bool,
    pub generated_at: DateTime<Utc>,
    /// Wall-clock time from submit to report
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub failed_subtasks: Vec<String>,
}

impl Default for ReportMetadata {
    fn default() -> Self {
        Self {
            warnings: Vec::new(),
            degraded: false,
            generated_at: Utc::now(),
            elapsed_ms: 0,
            failed_subtasks: Vec::new(),
        }
    }
}

/// The final research artifact of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub query: String,
    pub summary: String,
    pub sections: Vec<ReportSection>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub metadata: ReportMetadata,
}

impl Report {
    /// Every citation across all sections.
    pub fn citations(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|s| s.citations.iter().map(String::as_str))
    }

    pub fn warnings_of(&self, kind: WarningKind) -> impl Iterator<Item = &ReportWarning> {
        self.metadata.warnings.iter().filter(move |w| w.kind == kind)
    }

    /// Render the report as Markdown with a numbered source list.
    pub fn to_markdown(&self) -> String {
        let index: Vec<&str> = {
            let mut seen = HashSet::new();
            self.citations().filter(|c| seen.insert(*c)).collect()
        };
        let number = |id: &str| index.iter().position(|c| *c == id).map(|i| i + 1);

        let mut out = String::new();
        let _ = writeln!(out, "# {}\n", self.query);
        let _ = writeln!(out, "## Summary\n\n{}\n", self.summary.trim());

        for section in &self.sections {
            let _ = writeln!(out, "## {}\n\n{}", section.heading, section.body.trim());
            let markers: Vec<String> = section
                .citations
                .iter()
                .filter_map(|c| number(c))
                .map(|n| format!("[{}]", n))
                .collect();
            if !markers.is_empty() {
                let _ = writeln!(out, "\nSources: {}", markers.join(" "));
            }
            out.push('\n');
        }

        if !index.is_empty() {
            out.push_str("## Sources\n\n");
            for (i, id) in index.iter().enumerate() {
                let title = self
                    .sources
                    .iter()
                    .find(|s| s.source_id == *id)
                    .map(|s| s.title.as_str())
                    .unwrap_or(id);
                if title == *id {
                    let _ = writeln!(out, "{}. {}", i + 1, id);
                } else {
                    let _ = writeln!(out, "{}. {} - {}", i + 1, title, id);
                }
            }
            out.push('\n');
        }

        if !self.metadata.warnings.is_empty() {
            out.push_str("---\n\n");
            for warning in &self.metadata.warnings {
                let _ = writeln!(out, "> Note: {}", warning.message);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        Report {
            query: "Impact of remote work on urban real estate".into(),
            summary: "Offices emptied while suburbs gained.".into(),
            sections: vec![
                ReportSection {
                    heading: "Office vacancy".into(),
                    body: "Vacancy rose.".into(),
                    citations: vec!["https://a.example".into()],
                    subtask_id: Some("task_a".into()),
                },
                ReportSection {
                    heading: "Suburban prices".into(),
                    body: "Prices rose.".into(),
                    citations: vec!["https://b.example".into(), "https://a.example".into()],
                    subtask_id: Some("task_b".into()),
                },
            ],
            sources: vec![SourceRef {
                source_id: "https://a.example".into(),
                title: "Vacancy Index".into(),
            }],
            metadata: ReportMetadata::default(),
        }
    }

    #[test]
    fn test_markdown_numbers_sources_in_first_citation_order() {
        let md = sample().to_markdown();
        assert!(md.starts_with("# Impact of remote work on urban real estate"));
        assert!(md.contains("## Office vacancy"));
        assert!(md.contains("Sources: [2] [1]"));
        assert!(md.contains("1. Vacancy Index - https://a.example"));
        assert!(md.contains("2. https://b.example"));
    }

    #[test]
    fn test_markdown_lists_warnings() {
        let mut report = sample();
        report.metadata.warnings.push(ReportWarning::new(
            WarningKind::DroppedCitation,
            "Dropped unresolved citation https://ghost.example",
        ));
        let md = report.to_markdown();
        assert!(md.contains("> Note: Dropped unresolved citation https://ghost.example"));
        assert_eq!(report.warnings_of(WarningKind::DroppedCitation).count(), 1);
    }

    #[test]
    fn test_report_serialization_is_stable() {
        let report = sample();
        let a = serde_json::to_string(&report).unwrap();
        let b = serde_json::to_string(&report).unwrap();
        assert_eq!(a, b);
        let back: Report = serde_json::from_str(&a).unwrap();
        assert_eq!(back, report);
    }
}
