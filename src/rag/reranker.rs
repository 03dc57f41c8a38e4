//! Reranking for improving retrieval relevance.
//!
//! This module provides the optional reranking capability: a cross-encoder
//! scores each (query, candidate) pair and candidates are reordered by that
//! score. Two backends are available:
//!
//! - [`JinaReranker`] - the Jina rerank HTTP API
//! - [`LocalReranker`] - a local fastembed cross-encoder (feature `local-rerank`)

use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Document, ResearchError, Result};

/// Maximum characters of each candidate sent for scoring.
pub const MAX_RERANK_CHARS: usize = 2000;

/// Relevance score for the candidate at `index` in the submitted list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    pub index: usize,
    pub score: f32,
}

/// Reranking capability
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`.
    ///
    /// Scores may come back in any order and may omit candidates.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>>;

    fn name(&self) -> &str;

    /// Reorder candidates by descending score, replacing their relevance score.
    ///
    /// Candidates the backend did not score keep their original relative
    /// order after every scored candidate.
    async fn rerank(&self, query: &str, candidates: Vec<Document>) -> Result<Vec<Document>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let texts: Vec<String> = candidates.iter().map(rerank_text).collect();
        let scores = self.score(query, &texts).await?;
        Ok(apply_scores(candidates, &scores))
    }
}

/// Text submitted for a candidate: title plus truncated content.
fn rerank_text(doc: &Document) -> String {
    let text = if doc.title.is_empty() {
        doc.content.clone()
    } else {
        format!("{}\n{}", doc.title, doc.content)
    };
    text.chars().take(MAX_RERANK_CHARS).collect()
}

/// Reorder `candidates` by the given scores.
pub fn apply_scores(candidates: Vec<Document>, scores: &[RerankScore]) -> Vec<Document> {
    let mut slots: Vec<(Option<f32>, Document)> = candidates.into_iter().map(|d| (None, d)).collect();
    for s in scores {
        if let Some(slot) = slots.get_mut(s.index)
            && s.score.is_finite()
        {
            slot.0 = Some(s.score);
        }
    }

    // stable sort keeps raw order among unscored or tied candidates
    slots.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    slots
        .into_iter()
        .map(|(score, mut doc)| {
            if let Some(score) = score {
                doc.relevance_score = score;
            }
            doc
        })
        .collect()
}

// ============================================================================
// Jina Reranker
// ============================================================================

#[derive(Debug, Serialize)]
struct JinaRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    return_documents: bool,
}

#[derive(Debug, Deserialize)]
struct JinaResponse {
    results: Vec<JinaResult>,
}

#[derive(Debug, Deserialize)]
struct JinaResult {
    index: usize,
    relevance_score: f32,
}

/// Reranker backed by the Jina rerank API
pub struct JinaReranker {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl JinaReranker {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResearchError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

fn map_http_error(service: &str, e: reqwest::Error) -> ResearchError {
    if e.is_timeout() {
        ResearchError::Timeout(format!("{} request timed out: {}", service, e))
    } else if e.is_connect() || e.is_request() {
        ResearchError::Unavailable(format!("{} unreachable: {}", service, e))
    } else if e.is_decode() {
        ResearchError::InvalidResponse(format!("{} returned an unexpected body: {}", service, e))
    } else {
        ResearchError::Unavailable(format!("{} error: {}", service, e))
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub(crate) fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> ResearchError {
    let message = format!("{} returned {}: {}", service, status, body.trim());
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ResearchError::RateLimited(message)
    } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
        ResearchError::Unavailable(message)
    } else {
        ResearchError::InvalidResponse(message)
    }
}

#[async_trait]
impl Reranker for JinaReranker {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let request = JinaRequest {
            model: &self.model,
            query,
            documents,
            top_n: documents.len(),
            return_documents: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_http_error("Jina reranker", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("Jina reranker", status, &body));
        }

        let parsed: JinaResponse = response
            .json()
            .await
            .map_err(|e| map_http_error("Jina reranker", e))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| RerankScore {
                index: r.index,
                score: r.relevance_score,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "jina"
    }
}

// ============================================================================
// Local Reranker
// ============================================================================

#[cfg(feature = "local-rerank")]
pub use local::{LocalReranker, RerankerModelType};

#[cfg(feature = "local-rerank")]
mod local {
    use std::str::FromStr;
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{RerankInitOptions, RerankerModel as FastEmbedRerankerModel, TextRerank};
    use tokio::sync::OnceCell;

    use super::{RerankScore, Reranker};
    use crate::types::{ResearchError, Result};

    /// Supported local reranking models
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum RerankerModelType {
        /// BGE Reranker Base - English/Chinese, good balance of speed and quality
        #[default]
        BgeRerankerBase,
        /// BGE Reranker v2 M3 - Multilingual reranker
        BgeRerankerV2M3,
        /// Jina Reranker v1 Turbo - Fast English reranker
        JinaRerankerV1TurboEn,
        /// Jina Reranker v2 Base - Multilingual reranker
        JinaRerankerV2BaseMultilingual,
    }

    impl RerankerModelType {
        fn to_fastembed_model(self) -> FastEmbedRerankerModel {
            match self {
                Self::BgeRerankerBase => FastEmbedRerankerModel::BGERerankerBase,
                Self::BgeRerankerV2M3 => FastEmbedRerankerModel::BGERerankerV2M3,
                Self::JinaRerankerV1TurboEn => FastEmbedRerankerModel::JINARerankerV1TurboEn,
                // fastembed spells it "Multiligual"
                Self::JinaRerankerV2BaseMultilingual => {
                    FastEmbedRerankerModel::JINARerankerV2BaseMultiligual
                }
            }
        }
    }

    impl FromStr for RerankerModelType {
        type Err = ResearchError;

        fn from_str(s: &str) -> Result<Self> {
            match s.to_lowercase().as_str() {
                "bge-reranker-base" | "bge-base" => Ok(Self::BgeRerankerBase),
                "bge-reranker-v2-m3" | "bge-m3" => Ok(Self::BgeRerankerV2M3),
                "jina-reranker-v1-turbo-en" | "jina-turbo" => Ok(Self::JinaRerankerV1TurboEn),
                "jina-reranker-v2-base-multilingual" | "jina-multilingual" => {
                    Ok(Self::JinaRerankerV2BaseMultilingual)
                }
                _ => Err(ResearchError::Configuration(format!(
                    "Unknown local reranker model: {}. Use one of: bge-reranker-base, \
                     bge-reranker-v2-m3, jina-reranker-v1-turbo-en, jina-reranker-v2-base-multilingual",
                    s
                ))),
            }
        }
    }

    /// Cross-encoder reranker running in-process; weights load on first use
    pub struct LocalReranker {
        model_type: RerankerModelType,
        model: OnceCell<Arc<tokio::sync::Mutex<TextRerank>>>,
    }

    impl LocalReranker {
        pub fn new(model_type: RerankerModelType) -> Self {
            Self {
                model_type,
                model: OnceCell::new(),
            }
        }

        async fn get_model(&self) -> Result<Arc<tokio::sync::Mutex<TextRerank>>> {
            self.model
                .get_or_try_init(|| async {
                    let model_type = self.model_type;
                    tokio::task::spawn_blocking(move || {
                        let init_options = RerankInitOptions::new(model_type.to_fastembed_model())
                            .with_show_download_progress(false);
                        let model = TextRerank::try_new(init_options).map_err(|e| {
                            ResearchError::Unavailable(format!("Failed to load reranker: {}", e))
                        })?;
                        Ok(Arc::new(tokio::sync::Mutex::new(model)))
                    })
                    .await
                    .map_err(|e| ResearchError::Internal(format!("Reranker task failed: {}", e)))?
                })
                .await
                .map(Arc::clone)
        }
    }

    #[async_trait]
    impl Reranker for LocalReranker {
        async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
            if documents.is_empty() {
                return Ok(Vec::new());
            }

            let model = self.get_model().await?;
            let documents = documents.to_vec();
            let query = query.to_string();
            let scores = tokio::task::spawn_blocking(move || {
                let mut model = model.blocking_lock();
                model.rerank(query, &documents, false, None)
            })
            .await
            .map_err(|e| ResearchError::Internal(format!("Rerank task failed: {}", e)))?
            .map_err(|e| ResearchError::InvalidResponse(format!("Reranking failed: {}", e)))?;

            Ok(scores
                .into_iter()
                .map(|r| RerankScore {
                    index: r.index,
                    score: r.score,
                })
                .collect())
        }

        fn name(&self) -> &str {
            "local"
        }
    }
}
