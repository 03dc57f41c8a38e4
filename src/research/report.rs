//! Report stage: synthesize findings into a cited, sectioned report.
//!
//! Citations are validated against the documents actually retrieved in the
//! session; anything that does not resolve is dropped and noted in the
//! report metadata. When generation fails or stays malformed after one
//! re-prompt, the report is assembled mechanically from the findings.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{OutputFormat, StageModel};
use crate::research::parsing::{normalize_key, parse_json_object, parse_source_label};
use crate::research::prompts;
use crate::types::{
    Confidence, Report, ReportMetadata, ReportSection, ReportWarning, ResearchError, ResearchPlan,
    Result, SourceRef, SubTask, SubTaskStatus, WarningKind,
};

#[derive(Debug, Deserialize)]
struct ReportResponse {
    #[serde(default, alias = "executive_summary")]
    summary: String,
    #[serde(default)]
    sections: Vec<SectionResponse>,
}

#[derive(Debug, Deserialize)]
struct SectionResponse {
    #[serde(default, alias = "title")]
    heading: String,
    #[serde(default, alias = "content")]
    body: String,
    #[serde(default, alias = "sources")]
    citations: Vec<Value>,
    #[serde(default)]
    task: Option<Value>,
}

/// Every document retrieved in the session, labelled `S1..` in plan order.
struct SourceIndex {
    labelled: Vec<(String, String)>,
    titles: HashMap<String, String>,
}

impl SourceIndex {
    fn build(subtasks: &[SubTask]) -> Self {
        let mut labelled = Vec::new();
        let mut titles = HashMap::new();
        for doc in subtasks.iter().flat_map(|t| t.documents.iter()) {
            if !titles.contains_key(&doc.source_id) {
                titles.insert(doc.source_id.clone(), doc.title.clone());
                labelled.push((doc.source_id.clone(), doc.title.clone()));
            }
        }
        Self { labelled, titles }
    }

    fn label(&self, source_id: &str) -> Option<String> {
        self.labelled
            .iter()
            .position(|(id, _)| id == source_id)
            .map(|i| format!("S{}", i + 1))
    }

    /// A label or a raw source id, resolved to a known source id.
    fn resolve(&self, reference: &str) -> Option<String> {
        let reference = reference.trim();
        if self.titles.contains_key(reference) {
            return Some(reference.to_string());
        }
        let index = parse_source_label(reference)?;
        self.labelled.get(index - 1).map(|(id, _)| id.clone())
    }

    fn source_refs(&self, cited: &[String]) -> Vec<SourceRef> {
        cited
            .iter()
            .map(|id| SourceRef {
                source_id: id.clone(),
                title: self.titles.get(id).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

fn is_done(task: &SubTask) -> bool {
    task.status == SubTaskStatus::Done && task.findings.is_some()
}

pub struct ReportStage {
    model: StageModel,
}

impl ReportStage {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }

    /// Produce the report for `subtasks`, given in plan order. Never fails.
    pub async fn synthesize(&self, query: &str, plan: &ResearchPlan, subtasks: &[SubTask]) -> Report {
        if !subtasks.iter().any(is_done) {
            tracing::warn!("No sub-task produced findings, assembling report mechanically");
            return mechanical_report(query, plan, subtasks);
        }

        let index = SourceIndex::build(subtasks);
        let prompt = report_prompt(query, plan, subtasks, &index);

        let result = match self.attempt(&prompt, subtasks, &index).await {
            Err(ResearchError::MalformedOutput(reason)) => {
                tracing::warn!(reason = %reason, "Report output malformed, re-prompting");
                self.attempt(&prompts::with_format_reminder(&prompt), subtasks, &index)
                    .await
            }
            other => other,
        };

        match result {
            Ok((summary, mut sections, mut warnings)) => {
                add_missing_sections(&mut sections, subtasks, &index, &mut warnings);
                finish_report(query, plan, subtasks, &index, summary, sections, warnings, false)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Report generation failed, assembling report mechanically");
                mechanical_report(query, plan, subtasks)
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        subtasks: &[SubTask],
        index: &SourceIndex,
    ) -> Result<(String, Vec<ReportSection>, Vec<ReportWarning>)> {
        let response = self
            .model
            .generate(prompts::REPORT_SYSTEM, prompt, OutputFormat::Json)
            .await?;
        let parsed: ReportResponse = parse_json_object(&response)?;
        resolve_sections(parsed, subtasks, index)
    }
}

fn report_prompt(query: &str, plan: &ResearchPlan, subtasks: &[SubTask], index: &SourceIndex) -> String {
    let mut prompt = format!("Research Query: {}\n", query);
    if !plan.context.trim().is_empty() {
        let _ = writeln!(prompt, "Context: {}", plan.context.trim());
    }
    if !plan.approach.trim().is_empty() {
        let _ = writeln!(prompt, "Approach: {}", plan.approach.trim());
    }

    for (i, task) in subtasks.iter().enumerate() {
        let _ = write!(prompt, "\nTask {}: {}\n", i + 1, task.goal);
        let Some(findings) = task.findings.as_ref().filter(|_| is_done(task)) else {
            prompt.push_str("This task failed and has no findings. Do not write a section for it.\n");
            continue;
        };
        if !findings.summary.is_empty() {
            let _ = writeln!(prompt, "Summary: {}", findings.summary);
        }
        for insight in &findings.insights {
            let labels: Vec<String> = insight.sources.iter().filter_map(|s| index.label(s)).collect();
            if labels.is_empty() {
                let _ = writeln!(prompt, "- {} (no source)", insight.text);
            } else {
                let _ = writeln!(
                    prompt,
                    "- {} [{}] ({:?} confidence)",
                    insight.text,
                    labels.join(", "),
                    insight.confidence
                );
            }
        }
        if !findings.information_gaps.is_empty() {
            let _ = writeln!(prompt, "Gaps: {}", findings.information_gaps.join("; "));
        }
    }

    if !index.labelled.is_empty() {
        prompt.push_str("\nSources:\n");
        for (i, (id, title)) in index.labelled.iter().enumerate() {
            let _ = writeln!(prompt, "[S{}] {} - {}", i + 1, title, id);
        }
    }
    prompt.push_str("\nWrite the report.");
    prompt
}

fn resolve_sections(
    parsed: ReportResponse,
    subtasks: &[SubTask],
    index: &SourceIndex,
) -> Result<(String, Vec<ReportSection>, Vec<ReportWarning>)> {
    let mut warnings = Vec::new();
    let mut sections = Vec::new();

    for section in parsed.sections {
        let heading = section.heading.trim().to_string();
        let body = strip_label_markers(section.body.trim());
        if heading.is_empty() && body.is_empty() {
            continue;
        }

        let mut seen = HashSet::new();
        let mut citations = Vec::new();
        for citation in &section.citations {
            let reference = match citation {
                Value::String(s) => s.clone(),
                Value::Number(n) => format!("S{}", n),
                _ => continue,
            };
            match index.resolve(&reference) {
                Some(id) => {
                    if seen.insert(id.clone()) {
                        citations.push(id);
                    }
                }
                None => warnings.push(ReportWarning::new(
                    WarningKind::DroppedCitation,
                    format!("Dropped unresolved citation '{}' in section '{}'", reference, heading),
                )),
            }
        }

        let subtask_id = section_subtask(&section, &heading, subtasks);
        sections.push(ReportSection {
            heading,
            body,
            citations,
            subtask_id,
        });
    }

    let summary = parsed.summary.trim().to_string();
    if summary.is_empty() && sections.is_empty() {
        return Err(ResearchError::MalformedOutput(
            "report has neither a summary nor sections".to_string(),
        ));
    }
    Ok((summary, sections, warnings))
}

/// The completed sub-task a section covers: by task number, else by heading.
fn section_subtask(section: &SectionResponse, heading: &str, subtasks: &[SubTask]) -> Option<String> {
    let by_number = section
        .task
        .as_ref()
        .and_then(|t| match t {
            Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
            Value::String(s) => s.trim().trim_start_matches("Task").trim().parse().ok(),
            _ => None,
        })
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| subtasks.get(i));

    let task = by_number.or_else(|| {
        let key = normalize_key(heading);
        subtasks.iter().find(|t| normalize_key(&t.goal) == key)
    })?;
    is_done(task).then(|| task.id.clone())
}

/// Remove inline `[S1]` / `[S1, S2]` markers; citations are listed per section.
fn strip_label_markers(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find('[') {
        let Some(len) = rest[start..].find(']') else {
            break;
        };
        let inner = &rest[start + 1..start + len];
        let is_marker = !inner.trim().is_empty()
            && inner
                .split(',')
                .all(|part| part.trim().starts_with(['S', 's']) && parse_source_label(part).is_some());
        if is_marker {
            out.push_str(rest[..start].trim_end_matches(' '));
        } else {
            out.push_str(&rest[..=start + len]);
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

fn add_missing_sections(
    sections: &mut Vec<ReportSection>,
    subtasks: &[SubTask],
    index: &SourceIndex,
    warnings: &mut Vec<ReportWarning>,
) {
    for task in subtasks.iter().filter(|t| is_done(t)) {
        let covered = sections
            .iter()
            .any(|s| s.subtask_id.as_deref() == Some(task.id.as_str()));
        if !covered {
            warnings.push(ReportWarning::new(
                WarningKind::MissingSection,
                format!("Added a section for '{}' assembled from its findings", task.goal),
            ));
            sections.push(mechanical_section(task, index));
        }
    }
}

fn mechanical_section(task: &SubTask, index: &SourceIndex) -> ReportSection {
    let mut body = String::new();
    let mut citations = Vec::new();
    if let Some(findings) = &task.findings {
        if !findings.summary.is_empty() {
            let _ = writeln!(body, "{}\n", findings.summary);
        }
        for insight in &findings.insights {
            let note = match insight.confidence {
                Confidence::Low => " (low confidence)",
                _ => "",
            };
            let _ = writeln!(body, "- {}{}", insight.text, note);
        }
        citations = findings
            .cited_sources()
            .into_iter()
            .filter(|id| index.titles.contains_key(id))
            .collect();
    }
    ReportSection {
        heading: task.goal.clone(),
        body: body.trim_end().to_string(),
        citations,
        subtask_id: Some(task.id.clone()),
    }
}

/// Report assembled directly from findings: one section per completed
/// sub-task, insights as bullet points.
pub fn mechanical_report(query: &str, plan: &ResearchPlan, subtasks: &[SubTask]) -> Report {
    let index = SourceIndex::build(subtasks);
    let done: Vec<&SubTask> = subtasks.iter().filter(|t| is_done(t)).collect();

    let sections = done.iter().map(|t| mechanical_section(t, &index)).collect();
    let summaries: Vec<&str> = done
        .iter()
        .filter_map(|t| t.findings.as_ref())
        .map(|f| f.summary.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let summary = format!(
        "Research on \"{}\" completed {} of {} sub-tasks. {}",
        query,
        done.len(),
        subtasks.len(),
        summaries.join(" ")
    )
    .trim_end()
    .to_string();

    let warnings = vec![ReportWarning::new(
        WarningKind::MechanicalReport,
        "Report assembled mechanically from findings because synthesis was unavailable",
    )];
    finish_report(query, plan, subtasks, &index, summary, sections, warnings, true)
}

#[allow(clippy::too_many_arguments)]
fn finish_report(
    query: &str,
    plan: &ResearchPlan,
    subtasks: &[SubTask],
    index: &SourceIndex,
    summary: String,
    sections: Vec<ReportSection>,
    mut warnings: Vec<ReportWarning>,
    mechanical: bool,
) -> Report {
    if plan.degraded {
        warnings.push(ReportWarning::new(
            WarningKind::DegradedPlan,
            "Planning was unavailable; the query was researched as a single task",
        ));
    }

    let mut failed_subtasks = Vec::new();
    for task in subtasks {
        if task.status == SubTaskStatus::Failed {
            failed_subtasks.push(task.id.clone());
            warnings.push(ReportWarning::new(
                WarningKind::FailedSubtask,
                format!(
                    "Sub-task '{}' failed: {}",
                    task.goal,
                    task.error.as_deref().unwrap_or("unknown error")
                ),
            ));
            continue;
        }
        let Some(findings) = task.findings.as_ref() else {
            continue;
        };
        if findings.degraded {
            warnings.push(ReportWarning::new(
                WarningKind::DegradedAnalysis,
                format!("Findings for '{}' were not analysed in depth", task.goal),
            ));
        }
        if findings.insights.iter().any(|i| i.is_no_source()) {
            warnings.push(ReportWarning::new(
                WarningKind::LowConfidence,
                format!("No sources were found for '{}'", task.goal),
            ));
        }
    }

    let summary = if summary.is_empty() {
        format!("Findings for \"{}\" are presented by section below.", query)
    } else {
        summary
    };

    let mut seen = HashSet::new();
    let cited: Vec<String> = sections
        .iter()
        .flat_map(|s: &ReportSection| s.citations.iter())
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect();

    Report {
        query: query.to_string(),
        summary,
        sources: index.source_refs(&cited),
        sections,
        metadata: ReportMetadata {
            warnings,
            degraded: mechanical,
            generated_at: Utc::now(),
            elapsed_ms: 0,
            failed_subtasks,
        },
    }
}
