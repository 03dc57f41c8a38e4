//! Mock capabilities for pipeline tests.
//!
//! The scripted LLM answers per stage, recognised by its system prompt, so a
//! single client can stand in for every stage model.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use quarry::llm::{GenerationConstraints, LLMClient, RetryPolicy, StageModels};
use quarry::memory::MemoryStore;
use quarry::rag::{RerankScore, Reranker, RetrievalRequest, SourceRetriever};
use quarry::research::ResearchCoordinator;
use quarry::research::prompts::{ANALYZER_SYSTEM, PLANNER_SYSTEM, REPORT_SYSTEM, RETRIEVER_SYSTEM};
use quarry::types::{Document, ResearchError, Result};
use quarry::QuarryConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Which stage a generation request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Planner,
    Retriever,
    Analyzer,
    Report,
}

impl Role {
    fn of(system: &str) -> Option<Self> {
        [
            (PLANNER_SYSTEM, Role::Planner),
            (RETRIEVER_SYSTEM, Role::Retriever),
            (ANALYZER_SYSTEM, Role::Analyzer),
            (REPORT_SYSTEM, Role::Report),
        ]
        .into_iter()
        .find(|(prompt, _)| system.starts_with(prompt))
        .map(|(_, role)| role)
    }
}

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Transient failure, retried by the stage model
    Timeout,
    /// Permanent failure
    Invalid,
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Reply::Text(value.to_string())
    }
}

/// LLM client answering from per-role scripts.
///
/// Queued replies are consumed first; once a role's queue is empty its
/// fallback reply is repeated.
#[derive(Default)]
pub struct ScriptedLLM {
    queued: Mutex<HashMap<Role, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<Role, Reply>>,
    calls: Mutex<HashMap<Role, usize>>,
    prompts: Mutex<Vec<(Role, String)>>,
}

impl ScriptedLLM {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `role` with `reply`.
    pub fn always(self, role: Role, reply: Reply) -> Self {
        self.fallback.lock().insert(role, reply);
        self
    }

    /// Answer the next call for `role` with `reply`.
    pub fn then(self, role: Role, reply: Reply) -> Self {
        self.queued.lock().entry(role).or_default().push_back(reply);
        self
    }

    pub fn calls(&self, role: Role) -> usize {
        self.calls.lock().get(&role).copied().unwrap_or(0)
    }

    /// Prompts sent for `role`, oldest first.
    pub fn prompts(&self, role: Role) -> Vec<String> {
        self.prompts
            .lock()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl LLMClient for ScriptedLLM {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        _constraints: &GenerationConstraints,
    ) -> Result<String> {
        let role = Role::of(system)
            .ok_or_else(|| ResearchError::InvalidResponse("unrecognised system prompt".into()))?;
        *self.calls.lock().entry(role).or_default() += 1;
        self.prompts.lock().push((role, prompt.to_string()));

        let queued = self.queued.lock().get_mut(&role).and_then(|q| q.pop_front());
        let reply = match queued {
            Some(reply) => reply,
            None => self
                .fallback
                .lock()
                .get(&role)
                .cloned()
                .unwrap_or(Reply::Invalid),
        };
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Timeout => Err(ResearchError::Timeout(format!("{:?} timed out", role))),
            Reply::Invalid => Err(ResearchError::InvalidResponse(format!("{:?} rejected", role))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Retriever returning fixed documents per goal.
#[derive(Default)]
pub struct StaticRetriever {
    documents: HashMap<String, Vec<Document>>,
    default: Vec<Document>,
    failing: Vec<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_goal(mut self, goal: &str, documents: Vec<Document>) -> Self {
        self.documents.insert(goal.to_string(), documents);
        self
    }

    pub fn with_default(mut self, documents: Vec<Document>) -> Self {
        self.default = documents;
        self
    }

    /// Fail every retrieval for `goal` with a transient error.
    pub fn failing_for(mut self, goal: &str) -> Self {
        self.failing.push(goal.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most retrievals observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceRetriever for StaticRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(&request.goal) {
            return Err(ResearchError::Unavailable("search backend down".into()));
        }
        let docs = self
            .documents
            .get(&request.goal)
            .unwrap_or(&self.default)
            .iter()
            .take(request.limit)
            .cloned()
            .collect();
        Ok(docs)
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Reranker that scores documents by the order of a preferred id list.
pub struct PreferenceReranker {
    preferred: Vec<String>,
    calls: AtomicUsize,
}

impl PreferenceReranker {
    pub fn new(preferred: &[&str]) -> Self {
        Self {
            preferred: preferred.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reranker for PreferenceReranker {
    async fn score(&self, _query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = self.preferred.len();
        Ok(documents
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let rank = self
                    .preferred
                    .iter()
                    .position(|id| text.contains(id.as_str()))
                    .unwrap_or(n);
                RerankScore {
                    index,
                    score: 1.0 - rank as f32 / (n + 1) as f32,
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "preference"
    }
}

pub fn doc(id: &str, title: &str) -> Document {
    Document::new(id, title, format!("{} reports findings relevant to {}", title, id), 0.5)
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

pub fn test_config() -> QuarryConfig {
    let mut config = QuarryConfig::default();
    config.retry.max_attempts = 2;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config.retry.jitter = 0.0;
    config
}

pub fn coordinator(
    llm: Arc<ScriptedLLM>,
    retriever: Arc<dyn SourceRetriever>,
    reranker: Option<Arc<dyn Reranker>>,
    config: &QuarryConfig,
) -> ResearchCoordinator {
    let memory = Arc::new(MemoryStore::new(&config.memory));
    coordinator_with_memory(memory, llm, retriever, reranker, config)
}

pub fn coordinator_with_memory(
    memory: Arc<MemoryStore>,
    llm: Arc<ScriptedLLM>,
    retriever: Arc<dyn SourceRetriever>,
    reranker: Option<Arc<dyn Reranker>>,
    config: &QuarryConfig,
) -> ResearchCoordinator {
    let models = StageModels::uniform(llm, fast_retry(), Duration::from_secs(5));
    ResearchCoordinator::new(memory, models, retriever, reranker, config)
}
