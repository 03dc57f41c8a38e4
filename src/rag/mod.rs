//! Retrieval and reranking capabilities
//!
//! # Module Structure
//!
//! - [`rag::search`](crate::rag::search) - Retrieval backends (web search, generative)
//! - [`rag::reranker`](crate::rag::reranker) - Optional cross-encoder reranking
//!
//! Both are chosen from `quarry.toml`:
//!
//! ```toml
//! [retrieval]
//! backend = "web"
//! fetch_pages = 3
//!
//! [reranker]
//! backend = "jina"
//! api_key_env = "JINA_API_KEY"
//! ```

pub mod reranker;
pub mod search;

use std::sync::Arc;
use std::time::Duration;

use crate::llm::{RetryPolicy, StageModel};
use crate::utils::toml_config::{RerankerBackend, RerankerConfig, RetrievalBackend, RetrievalConfig};

pub use reranker::{JinaReranker, RerankScore, Reranker};
pub use search::{GenerativeRetriever, RetrievalRequest, SourceRetriever, WebSearchRetriever};

/// Build the configured reranker.
///
/// Reranking is optional: an unconfigured or unusable backend yields `None`
/// and retrieval keeps the raw order.
pub fn build_reranker(config: &RerankerConfig, timeout: Duration) -> Option<Arc<dyn Reranker>> {
    match config.backend {
        RerankerBackend::None => None,
        RerankerBackend::Jina => {
            let api_key = match std::env::var(&config.api_key_env) {
                Ok(key) if !key.trim().is_empty() => key,
                _ => {
                    tracing::warn!(
                        env = %config.api_key_env,
                        "Jina reranker configured but API key is not set, reranking disabled"
                    );
                    return None;
                }
            };
            match JinaReranker::new(&config.endpoint, api_key, &config.model, timeout) {
                Ok(reranker) => Some(Arc::new(reranker)),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to build Jina reranker, reranking disabled");
                    None
                }
            }
        }
        RerankerBackend::Local => build_local_reranker(config),
    }
}

#[cfg(feature = "local-rerank")]
fn build_local_reranker(config: &RerankerConfig) -> Option<Arc<dyn Reranker>> {
    match config.model.parse::<reranker::RerankerModelType>() {
        Ok(model) => Some(Arc::new(reranker::LocalReranker::new(model))),
        Err(e) => {
            tracing::warn!(model = %config.model, error = %e, "Unknown local reranker model, reranking disabled");
            None
        }
    }
}

#[cfg(not(feature = "local-rerank"))]
fn build_local_reranker(_config: &RerankerConfig) -> Option<Arc<dyn Reranker>> {
    tracing::warn!("Local reranker requires the 'local-rerank' feature, reranking disabled");
    None
}

/// Build the configured retrieval backend.
///
/// The generative backend drafts sources with `model`, normally the
/// retrieval stage's model. The retrieval stage retries the whole call, so
/// the model makes a single attempt bounded by the retrieval `timeout`.
pub fn build_retriever(
    config: &RetrievalConfig,
    model: StageModel,
    timeout: Duration,
) -> Arc<dyn SourceRetriever> {
    match config.backend {
        RetrievalBackend::Web => Arc::new(WebSearchRetriever::new(config.fetch_pages)),
        RetrievalBackend::Generative => Arc::new(GenerativeRetriever::new(
            model.with_retry(RetryPolicy::no_retry(), timeout),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationConstraints, LLMClient};
    use crate::research::RetrievalStage;
    use crate::types::{ResearchError, Result};
    use crate::utils::toml_config::TimeoutConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SlowClient(AtomicU32);

    #[async_trait]
    impl LLMClient for SlowClient {
        async fn generate(&self, _: &str, _: &str, _: &GenerationConstraints) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ResearchError::Timeout("no answer".into()))
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    fn three_attempts() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_generative_retrieval_retries_only_at_the_stage() {
        let client = Arc::new(SlowClient(AtomicU32::new(0)));
        let model = StageModel::new(client.clone(), GenerationConstraints::default())
            .with_retry(three_attempts(), Duration::from_secs(60));
        let config = RetrievalConfig {
            backend: RetrievalBackend::Generative,
            ..Default::default()
        };
        let retriever = build_retriever(&config, model, Duration::from_secs(5));
        let stage = RetrievalStage::new(retriever, &config)
            .with_retry(three_attempts(), &TimeoutConfig::default());

        let result = stage.retrieve("office vacancy", "").await;
        assert!(matches!(result, Err(ResearchError::Timeout(_))));
        assert_eq!(client.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_no_reranker_by_default() {
        let config = RerankerConfig::default();
        assert!(build_reranker(&config, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_jina_without_key_is_disabled() {
        let config = RerankerConfig {
            backend: RerankerBackend::Jina,
            api_key_env: "QUARRY_TEST_SURELY_UNSET_JINA_KEY".to_string(),
            ..Default::default()
        };
        assert!(build_reranker(&config, Duration::from_secs(1)).is_none());
    }
}
