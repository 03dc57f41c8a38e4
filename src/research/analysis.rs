//! Analysis stage: extract sourced insights from a sub-task's documents.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::llm::{OutputFormat, StageModel};
use crate::memory::{estimate_tokens, truncate_to_tokens};
use crate::research::parsing::{parse_json_object, parse_source_label};
use crate::research::prompts::{self, Excerpt};
use crate::types::{Confidence, Document, Findings, Insight, ResearchError, Result};

/// Smallest excerpt worth sending; documents past this point are left out.
const MIN_EXCERPT_TOKENS: usize = 48;

/// Documents summarised by the degraded fallback.
const FALLBACK_DOCUMENTS: usize = 3;

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    summary: String,
    #[serde(default, alias = "insights")]
    key_insights: Vec<InsightResponse>,
    #[serde(default)]
    information_gaps: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct InsightResponse {
    #[serde(default, alias = "text")]
    insight: String,
    #[serde(default, alias = "supporting_sources", alias = "source_ids")]
    sources: Vec<Value>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

pub struct AnalysisStage {
    model: StageModel,
    context_tokens: usize,
}

impl AnalysisStage {
    pub fn new(model: StageModel, context_tokens: usize) -> Self {
        Self {
            model,
            context_tokens: context_tokens.max(MIN_EXCERPT_TOKENS),
        }
    }

    /// Findings for `goal` over `documents`, which arrive most relevant first.
    ///
    /// An empty document list yields no-source findings without a model
    /// call. Unparseable output gets one re-prompt, then degraded findings
    /// built from the top documents. Errors are returned only when
    /// generation itself fails after retries.
    pub async fn analyze(&self, goal: &str, context: &str, documents: &[Document]) -> Result<Findings> {
        if documents.is_empty() {
            return Ok(Findings::insufficient_information(goal));
        }

        let excerpts = self.excerpts(documents);
        let prompt = prompts::analysis_prompt(goal, context, &excerpts);

        match self.attempt(&prompt, &excerpts).await {
            Err(ResearchError::MalformedOutput(reason)) => {
                tracing::warn!(reason = %reason, "Analysis output malformed, re-prompting");
            }
            other => return other,
        }

        match self
            .attempt(&prompts::with_format_reminder(&prompt), &excerpts)
            .await
        {
            Err(ResearchError::MalformedOutput(reason)) => {
                tracing::warn!(reason = %reason, "Analysis still malformed, using degraded findings");
                Ok(degraded_findings(goal, documents))
            }
            other => other,
        }
    }

    /// Label and truncate documents to the context budget, in order.
    fn excerpts<'a>(&self, documents: &'a [Document]) -> Vec<Excerpt<'a>> {
        let mut remaining = self.context_tokens;
        let mut excerpts = Vec::new();

        for (i, doc) in documents.iter().enumerate() {
            if remaining < MIN_EXCERPT_TOKENS {
                break;
            }
            let share = (remaining / (documents.len() - i)).max(MIN_EXCERPT_TOKENS);
            let text = truncate_to_tokens(&doc.content, share);
            remaining = remaining.saturating_sub(estimate_tokens(&text));
            excerpts.push(Excerpt {
                label: format!("S{}", i + 1),
                title: &doc.title,
                source_id: &doc.source_id,
                text,
            });
        }
        excerpts
    }

    async fn attempt(&self, prompt: &str, excerpts: &[Excerpt<'_>]) -> Result<Findings> {
        let response = self
            .model
            .generate(prompts::ANALYZER_SYSTEM, prompt, OutputFormat::Json)
            .await?;
        let parsed: AnalysisResponse = parse_json_object(&response)?;
        resolve_findings(parsed, excerpts)
    }
}

/// Map source labels to document ids, dropping insights that cite nothing
/// resolvable.
fn resolve_findings(parsed: AnalysisResponse, excerpts: &[Excerpt<'_>]) -> Result<Findings> {
    let mut warnings = Vec::new();
    let mut insights = Vec::new();

    for item in parsed.key_insights {
        let text = item.insight.trim();
        if text.is_empty() {
            continue;
        }

        let mut seen = HashSet::new();
        let sources: Vec<String> = item
            .sources
            .iter()
            .filter_map(|reference| resolve_reference(reference, excerpts))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if sources.is_empty() {
            warnings.push(format!("Dropped insight without a resolvable source: {}", text));
            continue;
        }

        let confidence = item
            .confidence
            .as_deref()
            .and_then(|c| c.parse::<Confidence>().ok())
            .unwrap_or_default();

        insights.push(Insight {
            text: text.to_string(),
            sources,
            confidence,
            tag: item.category.filter(|c| !c.trim().is_empty()),
        });
    }

    if insights.is_empty() {
        return Err(ResearchError::MalformedOutput(
            "analysis produced no sourced insights".to_string(),
        ));
    }

    Ok(Findings {
        summary: parsed.summary.trim().to_string(),
        insights,
        information_gaps: parsed
            .information_gaps
            .iter()
            .filter_map(|gap| match gap {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .collect(),
        warnings,
        degraded: false,
    })
}

fn resolve_reference(reference: &Value, excerpts: &[Excerpt<'_>]) -> Option<String> {
    let index = match reference {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => {
            if let Some(excerpt) = excerpts.iter().find(|e| e.source_id == s.trim()) {
                return Some(excerpt.source_id.to_string());
            }
            parse_source_label(s)
        }
        _ => None,
    }?;
    excerpts
        .get(index.checked_sub(1)?)
        .map(|e| e.source_id.to_string())
}

/// One low-confidence insight per top document.
fn degraded_findings(goal: &str, documents: &[Document]) -> Findings {
    let insights = documents
        .iter()
        .take(FALLBACK_DOCUMENTS)
        .map(|doc| {
            let excerpt = truncate_to_tokens(doc.content.trim(), 60);
            let text = if doc.title.trim().is_empty() {
                excerpt
            } else {
                format!("{}: {}", doc.title.trim(), excerpt)
            };
            Insight {
                text,
                sources: vec![doc.source_id.clone()],
                confidence: Confidence::Low,
                tag: None,
            }
        })
        .collect();

    Findings {
        summary: format!("Automated analysis was unavailable for \"{}\"; the top sources are listed unanalysed.", goal),
        insights,
        information_gaps: Vec::new(),
        warnings: vec!["Analysis output could not be parsed; findings list top sources only".to_string()],
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationConstraints, LLMClient, RetryPolicy};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Scripted {
        responses: Mutex<VecDeque<Result<String>>>,
        calls: AtomicU32,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMClient for Scripted {
        async fn generate(&self, _: &str, prompt: &str, _: &GenerationConstraints) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().push(prompt.to_string());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ResearchError::Internal("script exhausted".into())))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn setup(responses: Vec<Result<String>>, budget: usize) -> (Arc<Scripted>, AnalysisStage) {
        let client = Arc::new(Scripted {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        });
        let model = StageModel::new(client.clone(), GenerationConstraints::default())
            .with_retry(RetryPolicy::no_retry(), Duration::from_secs(1));
        (client, AnalysisStage::new(model, budget))
    }

    fn docs() -> Vec<Document> {
        vec![
            Document::new("https://a.example", "Vacancy Index", "Office vacancy reached 20% in 2024.", 0.9),
            Document::new("https://b.example", "Leasing Report", "Sublease space doubled since 2019.", 0.5),
        ]
    }

    #[tokio::test]
    async fn test_empty_documents_skip_generation() {
        let (client, stage) = setup(vec![], 3000);
        let findings = stage.analyze("vacancy", "", &[]).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(findings.insights.iter().all(|i| i.is_no_source()));
        assert!(findings.insights.iter().all(|i| i.confidence == Confidence::Low));
    }

    #[tokio::test]
    async fn test_labels_resolve_to_source_ids() {
        let response = r#"{
            "summary": "Vacancy is high.",
            "key_insights": [
                {"insight": "Vacancy hit 20%", "sources": ["S1", "[S1]"], "confidence": "high", "category": "statistic"},
                {"insight": "Sublease doubled", "sources": ["https://b.example"], "confidence": "moderate"},
                {"insight": "Rents will fall", "sources": ["S9"]}
            ],
            "information_gaps": ["Regional breakdown", 4]
        }"#;
        let (_, stage) = setup(vec![Ok(response.into())], 3000);
        let findings = stage.analyze("vacancy", "", &docs()).await.unwrap();

        assert_eq!(findings.insights.len(), 2);
        assert_eq!(findings.insights[0].sources, vec!["https://a.example"]);
        assert_eq!(findings.insights[0].confidence, Confidence::High);
        assert_eq!(findings.insights[0].tag.as_deref(), Some("statistic"));
        assert_eq!(findings.insights[1].sources, vec!["https://b.example"]);
        assert_eq!(findings.insights[1].confidence, Confidence::Medium);
        assert_eq!(findings.information_gaps, vec!["Regional breakdown"]);
        assert_eq!(findings.warnings.len(), 1);
        assert!(!findings.degraded);
    }

    #[tokio::test]
    async fn test_malformed_output_reprompts_then_degrades() {
        let (client, stage) = setup(
            vec![Ok("I think vacancy is high.".into()), Ok(r#"{"key_insights": []}"#.into())],
            3000,
        );
        let findings = stage.analyze("vacancy", "", &docs()).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert!(client.prompts.lock()[1].contains(prompts::FORMAT_REMINDER));
        assert!(findings.degraded);
        assert_eq!(findings.insights.len(), 2);
        assert!(findings.insights.iter().all(|i| i.confidence == Confidence::Low));
        assert_eq!(findings.insights[0].sources, vec!["https://a.example"]);
    }

    #[tokio::test]
    async fn test_generation_failure_is_returned() {
        let (_, stage) = setup(vec![Err(ResearchError::RateLimited("slow down".into()))], 3000);
        let result = stage.analyze("vacancy", "", &docs()).await;
        assert!(matches!(result, Err(ResearchError::RateLimited(_))));
    }

    #[test]
    fn test_excerpts_prioritize_relevant_documents() {
        let (_, stage) = setup(vec![], 60);
        let long = "word ".repeat(400);
        let documents = vec![
            Document::new("a", "A", long.clone(), 0.9),
            Document::new("b", "B", long.clone(), 0.8),
            Document::new("c", "C", long, 0.7),
        ];
        let excerpts = stage.excerpts(&documents);
        assert_eq!(excerpts.len(), 1);
        assert_eq!(excerpts[0].label, "S1");
        assert!(excerpts[0].text.ends_with('…'));
    }
}
