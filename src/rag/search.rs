//! Retrieval capability: raw candidate documents for a sub-task goal.
//!
//! Two backends are available:
//! - [`WebSearchRetriever`] - DuckDuckGo search via daedra, optionally fetching
//!   the top pages for full content
//! - [`GenerativeRetriever`] - the generation capability drafts candidate
//!   sources when no live search is available

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;

use crate::llm::{OutputFormat, StageModel};
use crate::research::parsing::parse_json_object;
use crate::research::prompts;
use crate::types::{Document, ResearchError, Result};

/// Characters of fetched page content kept per document.
pub const MAX_PAGE_CHARS: usize = 8000;

/// What a retriever is asked for.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub goal: String,
    /// Planning context, used by backends that can take it into account
    pub context: String,
    /// Upper bound on returned candidates
    pub limit: usize,
}

impl RetrievalRequest {
    pub fn new(goal: impl Into<String>, limit: usize) -> Self {
        Self {
            goal: goal.into(),
            context: String::new(),
            limit,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// Retrieval capability
///
/// Returns candidates in the backend's own relevance order. Failures use the
/// transient error variants when a retry could help.
#[async_trait]
pub trait SourceRetriever: Send + Sync {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Document>>;

    fn name(&self) -> &str;
}

/// Score for the candidate at `rank` when the backend reports none.
fn rank_score(rank: usize) -> f32 {
    1.0 / (1.0 + rank as f32)
}

// ============================================================================
// Web search
// ============================================================================

/// Web search retriever powered by daedra
pub struct WebSearchRetriever {
    fetch_pages: usize,
}

impl WebSearchRetriever {
    /// `fetch_pages` top hits are fetched to replace their snippet with page content.
    pub fn new(fetch_pages: usize) -> Self {
        Self { fetch_pages }
    }

    async fn fetch_content(url: &str) -> Option<String> {
        let args = daedra::VisitPageArgs {
            url: url.to_string(),
            include_images: false,
            selector: None,
        };
        match daedra::tools::fetch::fetch_page(&args).await {
            Ok(page) if !page.content.trim().is_empty() => {
                Some(page.content.chars().take(MAX_PAGE_CHARS).collect())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Page fetch failed, keeping snippet");
                None
            }
        }
    }
}

impl Default for WebSearchRetriever {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl SourceRetriever for WebSearchRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Document>> {
        let search_args = daedra::SearchArgs {
            query: request.goal.clone(),
            options: Some(daedra::SearchOptions {
                num_results: request.limit,
                ..Default::default()
            }),
        };

        let response = daedra::tools::search::perform_search(&search_args)
            .await
            .map_err(|e| ResearchError::from_provider_message("Search", e.to_string()))?;

        let mut documents: Vec<Document> = response
            .data
            .iter()
            .take(request.limit)
            .enumerate()
            .map(|(rank, r)| Document::new(&r.url, &r.title, &r.description, rank_score(rank)))
            .collect();

        if self.fetch_pages > 0 {
            let pages = join_all(
                documents
                    .iter()
                    .take(self.fetch_pages)
                    .map(|d| Self::fetch_content(&d.source_id)),
            )
            .await;
            for (doc, page) in documents.iter_mut().zip(pages) {
                if let Some(content) = page {
                    doc.content = content;
                }
            }
        }

        Ok(documents)
    }

    fn name(&self) -> &str {
        "web"
    }
}

// ============================================================================
// Generative
// ============================================================================

#[derive(Debug, Deserialize)]
struct DraftedSources {
    #[serde(default)]
    sources: Vec<DraftedSource>,
}

#[derive(Debug, Deserialize)]
struct DraftedSource {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    publication: String,
    #[serde(default, deserialize_with = "lenient_string")]
    year: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Years come back as numbers or strings depending on the model.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Retriever that asks the generation capability for candidate sources
pub struct GenerativeRetriever {
    model: StageModel,
}

impl GenerativeRetriever {
    pub fn new(model: StageModel) -> Self {
        Self { model }
    }
}

/// Stable id for a drafted source without a URL.
fn generated_source_id(title: &str) -> String {
    let slug = title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    format!("generated:{}", slug)
}

impl DraftedSource {
    fn into_document(self, rank: usize) -> Option<Document> {
        if self.content.trim().is_empty() {
            return None;
        }
        let title = if self.title.trim().is_empty() {
            self.publication.clone()
        } else {
            self.title.clone()
        };
        let url = self.url.trim();
        let source_id = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if title.trim().is_empty() {
            return None;
        } else {
            generated_source_id(&title)
        };

        let byline: Vec<&str> = [self.author.as_str(), self.publication.as_str(), self.year.as_str()]
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let content = if byline.is_empty() {
            self.content
        } else {
            format!("{}\n({})", self.content, byline.join(", "))
        };

        Some(Document::new(source_id, title, content, rank_score(rank)))
    }
}

#[async_trait]
impl SourceRetriever for GenerativeRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Document>> {
        let prompt = prompts::retrieval_prompt(&request.goal, &request.context, request.limit);
        let response = self
            .model
            .generate(prompts::RETRIEVER_SYSTEM, &prompt, OutputFormat::Json)
            .await?;

        let drafted: DraftedSources = parse_json_object(&response)?;
        Ok(drafted
            .sources
            .into_iter()
            .take(request.limit)
            .enumerate()
            .filter_map(|(rank, source)| source.into_document(rank))
            .collect())
    }

    fn name(&self) -> &str {
        "generative"
    }
}
