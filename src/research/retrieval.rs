//! Retrieval stage: candidates for one sub-task goal, deduplicated,
//! optionally reranked and bounded.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{RetryPolicy, with_retry};
use crate::rag::{Reranker, RetrievalRequest, SourceRetriever};
use crate::types::{Document, Result};
use crate::utils::toml_config::{RetrievalConfig, TimeoutConfig};

pub struct RetrievalStage {
    retriever: Arc<dyn SourceRetriever>,
    reranker: Option<Arc<dyn Reranker>>,
    retry: RetryPolicy,
    retrieval_timeout: Duration,
    rerank_timeout: Duration,
    max_candidates: usize,
    max_documents: usize,
}

impl RetrievalStage {
    pub fn new(retriever: Arc<dyn SourceRetriever>, config: &RetrievalConfig) -> Self {
        let timeouts = TimeoutConfig::default();
        Self {
            retriever,
            reranker: None,
            retry: RetryPolicy::default(),
            retrieval_timeout: timeouts.retrieval(),
            rerank_timeout: timeouts.rerank(),
            max_candidates: config.max_candidates.max(1),
            max_documents: config.max_documents.max(1),
        }
    }

    pub fn with_reranker(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy, timeouts: &TimeoutConfig) -> Self {
        self.retry = retry;
        self.retrieval_timeout = timeouts.retrieval();
        self.rerank_timeout = timeouts.rerank();
        self
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    /// Documents for `goal`, most relevant first.
    ///
    /// An empty list is a valid outcome. Errors are returned only when the
    /// retrieval backend fails after every retry; a failing reranker
    /// degrades to the raw order.
    pub async fn retrieve(&self, goal: &str, context: &str) -> Result<Vec<Document>> {
        let request = RetrievalRequest::new(goal, self.max_candidates).with_context(context);
        let retriever = &self.retriever;
        let raw = with_retry(&self.retry, self.retrieval_timeout, "retrieval", || {
            retriever.retrieve(&request)
        })
        .await?;

        let candidates = dedupe(raw, self.max_candidates);
        tracing::debug!(
            retriever = retriever.name(),
            candidates = candidates.len(),
            "Retrieved candidates"
        );

        let mut ranked = match &self.reranker {
            Some(reranker) if !candidates.is_empty() => {
                let result = with_retry(&self.retry, self.rerank_timeout, "rerank", || {
                    reranker.rerank(goal, candidates.clone())
                })
                .await;
                match result {
                    Ok(ranked) => ranked,
                    Err(e) => {
                        tracing::warn!(
                            reranker = reranker.name(),
                            error = %e,
                            "Reranking failed, keeping retrieval order"
                        );
                        candidates
                    }
                }
            }
            _ => candidates,
        };

        ranked.truncate(self.max_documents);
        Ok(ranked)
    }
}

/// Keep the first occurrence of each source id, up to `limit` candidates.
fn dedupe(documents: Vec<Document>, limit: usize) -> Vec<Document> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|d| !d.source_id.trim().is_empty())
        .filter(|d| seen.insert(d.source_id.clone()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::RerankScore;
    use crate::types::ResearchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedRetriever(Vec<Document>);

    #[async_trait]
    impl SourceRetriever for FixedRetriever {
        async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Document>> {
            Ok(self.0.iter().take(request.limit * 2).cloned().collect())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// Scores candidates by content length.
    struct LengthReranker;

    #[async_trait]
    impl Reranker for LengthReranker {
        async fn score(&self, _query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
            Ok(documents
                .iter()
                .enumerate()
                .map(|(index, d)| RerankScore {
                    index,
                    score: d.len() as f32,
                })
                .collect())
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    struct BrokenReranker(AtomicU32);

    #[async_trait]
    impl Reranker for BrokenReranker {
        async fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<RerankScore>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ResearchError::InvalidResponse("bad body".into()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn docs() -> Vec<Document> {
        vec![
            Document::new("a", "", "x", 0.9),
            Document::new("b", "", "xxx", 0.8),
            Document::new("a", "", "duplicate", 0.7),
            Document::new("c", "", "xx", 0.6),
        ]
    }

    fn stage(documents: Vec<Document>, max_documents: usize) -> RetrievalStage {
        let config = RetrievalConfig {
            max_candidates: 10,
            max_documents,
            ..Default::default()
        };
        RetrievalStage::new(Arc::new(FixedRetriever(documents)), &config)
            .with_retry(RetryPolicy::no_retry(), &TimeoutConfig::default())
    }

    #[tokio::test]
    async fn test_without_reranker_keeps_raw_order() {
        let result = stage(docs(), 10).retrieve("goal", "").await.unwrap();
        let ids: Vec<_> = result.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(result[0].content, "x");
        assert_eq!(result[2].relevance_score, 0.6);
    }

    #[tokio::test]
    async fn test_reranker_reorders_and_bounds() {
        let stage = stage(docs(), 2).with_reranker(Some(Arc::new(LengthReranker)));
        let result = stage.retrieve("goal", "").await.unwrap();
        let ids: Vec<_> = result.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_failing_reranker_falls_back_to_raw_order() {
        let reranker = Arc::new(BrokenReranker(AtomicU32::new(0)));
        let stage = stage(docs(), 10).with_reranker(Some(reranker.clone()));
        let result = stage.retrieve("goal", "").await.unwrap();
        let ids: Vec<_> = result.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(reranker.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_retrieval_is_not_an_error() {
        let reranker = Arc::new(BrokenReranker(AtomicU32::new(0)));
        let stage = stage(Vec::new(), 10).with_reranker(Some(reranker.clone()));
        assert!(stage.retrieve("goal", "").await.unwrap().is_empty());
        assert_eq!(reranker.0.load(Ordering::SeqCst), 0);
    }
}
