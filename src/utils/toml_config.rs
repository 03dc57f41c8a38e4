//! TOML-based configuration for Quarry
//!
//! This module provides declarative configuration for providers, per-stage models,
//! research bounds, retry policy, timeouts, retention and reranking via a TOML
//! file (`quarry.toml`). Every field has a default, so an empty file is valid.
//!
//! Use [`ConfigManager`] for thread-safe access to the current configuration.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Root configuration structure loaded from quarry.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Named LLM provider configurations
    #[serde(default = "default_providers")]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub reranker: RerankerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            providers: default_providers(),
            llm: LlmConfig::default(),
            research: ResearchConfig::default(),
            retrieval: RetrievalConfig::default(),
            reranker: RerankerConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Fallback filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============= Provider Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
        #[serde(default = "default_ollama_model")]
        default_model: String,
    },
    OpenAI {
        /// Environment variable containing API key
        api_key_env: String,
        #[serde(default = "default_openai_base")]
        api_base: String,
        default_model: String,
    },
}

impl ProviderConfig {
    pub fn default_model(&self) -> &str {
        match self {
            ProviderConfig::Ollama { default_model, .. } => default_model,
            ProviderConfig::OpenAI { default_model, .. } => default_model,
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_providers() -> HashMap<String, ProviderConfig> {
    let mut providers = HashMap::new();
    providers.insert(
        default_provider_name(),
        ProviderConfig::Ollama {
            base_url: default_ollama_url(),
            default_model: default_ollama_model(),
        },
    );
    providers
}

// ============= Model Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider used by every stage without its own override
    #[serde(default = "default_provider_name")]
    pub provider: String,

    #[serde(default)]
    pub stages: StageModels,
}

fn default_provider_name() -> String {
    "local".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_name(),
            stages: StageModels::default(),
        }
    }
}

/// Per-stage generation settings.
///
/// Planning and reporting favour larger outputs with low temperature, retrieval
/// drafting is near-deterministic, analysis allows slightly more variety.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageModels {
    #[serde(default = "default_planning_model")]
    pub planning: StageModelConfig,
    #[serde(default = "default_retrieval_model")]
    pub retrieval: StageModelConfig,
    #[serde(default = "default_analysis_model")]
    pub analysis: StageModelConfig,
    #[serde(default = "default_report_model")]
    pub report: StageModelConfig,
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            planning: default_planning_model(),
            retrieval: default_retrieval_model(),
            analysis: default_analysis_model(),
            report: default_report_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageModelConfig {
    /// Reference to a provider name defined in [providers]; defaults to `llm.provider`
    pub provider: Option<String>,

    /// Model name; defaults to the provider's `default_model`
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_model_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_model_max_tokens() -> u32 {
    4096
}

fn stage_model(temperature: f32, max_tokens: u32) -> StageModelConfig {
    StageModelConfig {
        provider: None,
        model: None,
        temperature,
        max_tokens,
    }
}

fn default_planning_model() -> StageModelConfig {
    stage_model(0.2, 4096)
}

fn default_retrieval_model() -> StageModelConfig {
    stage_model(0.1, 2048)
}

fn default_analysis_model() -> StageModelConfig {
    stage_model(0.3, 4096)
}

fn default_report_model() -> StageModelConfig {
    stage_model(0.2, 8192)
}

// ============= Research Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Upper bound on planned sub-tasks
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,

    /// Sub-task pipelines running at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel_subtasks: usize,

    /// Queries longer than this are rejected
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    /// Token budget for document excerpts handed to analysis (~4 chars per token)
    #[serde(default = "default_analysis_context_tokens")]
    pub analysis_context_tokens: usize,

    /// Token budget for prior-conversation context handed to planning
    #[serde(default = "default_conversation_context_tokens")]
    pub conversation_context_tokens: usize,
}

fn default_max_subtasks() -> usize {
    5
}

fn default_max_parallel() -> usize {
    3
}

fn default_max_query_chars() -> usize {
    2000
}

fn default_analysis_context_tokens() -> usize {
    3000
}

fn default_conversation_context_tokens() -> usize {
    1000
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_subtasks: default_max_subtasks(),
            max_parallel_subtasks: default_max_parallel(),
            max_query_chars: default_max_query_chars(),
            analysis_context_tokens: default_analysis_context_tokens(),
            conversation_context_tokens: default_conversation_context_tokens(),
        }
    }
}

// ============= Retrieval Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalBackend {
    /// Live web search
    Web,
    /// Candidate sources drafted by the generation capability
    Generative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_backend")]
    pub backend: RetrievalBackend,

    /// Candidates considered per sub-task (after deduplication)
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Documents kept per sub-task after reranking
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,

    /// Number of top web hits whose full page content is fetched
    #[serde(default)]
    pub fetch_pages: usize,
}

fn default_retrieval_backend() -> RetrievalBackend {
    RetrievalBackend::Web
}

fn default_max_candidates() -> usize {
    20
}

fn default_max_documents() -> usize {
    8
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: default_retrieval_backend(),
            max_candidates: default_max_candidates(),
            max_documents: default_max_documents(),
            fetch_pages: 0,
        }
    }
}

// ============= Reranker Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerBackend {
    /// Reranking disabled; raw retrieval order is kept
    None,
    /// Jina rerank HTTP API
    Jina,
    /// Local cross-encoder (requires the `local-rerank` feature)
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_backend")]
    pub backend: RerankerBackend,

    #[serde(default = "default_reranker_model")]
    pub model: String,

    /// Environment variable containing the API key (Jina)
    #[serde(default = "default_reranker_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_reranker_endpoint")]
    pub endpoint: String,
}

fn default_reranker_backend() -> RerankerBackend {
    RerankerBackend::None
}

fn default_reranker_model() -> String {
    "jina-reranker-v2-base-multilingual".to_string()
}

fn default_reranker_key_env() -> String {
    "JINA_API_KEY".to_string()
}

fn default_reranker_endpoint() -> String {
    "https://api.jina.ai/v1/rerank".to_string()
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: default_reranker_backend(),
            model: default_reranker_model(),
            api_key_env: default_reranker_key_env(),
            endpoint: default_reranker_endpoint(),
        }
    }
}

// ============= Retry & Timeout Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per capability call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Random extra delay as a fraction of the computed backoff
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_generation_secs")]
    pub generation_secs: u64,

    #[serde(default = "default_retrieval_secs")]
    pub retrieval_secs: u64,

    #[serde(default = "default_rerank_secs")]
    pub rerank_secs: u64,
}

fn default_generation_secs() -> u64 {
    60
}

fn default_retrieval_secs() -> u64 {
    30
}

fn default_rerank_secs() -> u64 {
    15
}

impl TimeoutConfig {
    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn retrieval(&self) -> Duration {
        Duration::from_secs(self.retrieval_secs)
    }

    pub fn rerank(&self) -> Duration {
        Duration::from_secs(self.rerank_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generation_secs: default_generation_secs(),
            retrieval_secs: default_retrieval_secs(),
            rerank_secs: default_rerank_secs(),
        }
    }
}

// ============= Memory Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Sessions kept in memory; the least recently used is evicted beyond this
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Sessions untouched for longer than this are evicted
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Optional snapshot file used by the CLI to persist conversations
    pub snapshot_path: Option<String>,
}

fn default_max_sessions() -> usize {
    256
}

fn default_session_ttl_secs() -> u64 {
    86400
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            session_ttl_secs: default_session_ttl_secs(),
            snapshot_path: None,
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Provider '{0}' referenced by {1} does not exist")]
    MissingProvider(String, String),
}

impl QuarryConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: QuarryConfig = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::FileNotFound(path)) => {
                info!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration for internal consistency
    ///
    /// API key variables are not checked here; they are resolved when a client
    /// is built so that `quarry config` works without secrets present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.providers.contains_key(&self.llm.provider) {
            return Err(ConfigError::MissingProvider(
                self.llm.provider.clone(),
                "llm.provider".to_string(),
            ));
        }

        for (stage, settings) in self.llm.stages.iter() {
            if let Some(ref provider) = settings.provider
                && !self.providers.contains_key(provider)
            {
                return Err(ConfigError::MissingProvider(
                    provider.clone(),
                    format!("llm.stages.{}", stage),
                ));
            }
            if settings.max_tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "llm.stages.{}.max_tokens must be greater than zero",
                    stage
                )));
            }
            if !(0.0..=2.0).contains(&settings.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "llm.stages.{}.temperature must be between 0.0 and 2.0",
                    stage
                )));
            }
        }

        let bounds = [
            ("research.max_subtasks", self.research.max_subtasks),
            ("research.max_parallel_subtasks", self.research.max_parallel_subtasks),
            ("research.max_query_chars", self.research.max_query_chars),
            ("research.analysis_context_tokens", self.research.analysis_context_tokens),
            ("retrieval.max_candidates", self.retrieval.max_candidates),
            ("retrieval.max_documents", self.retrieval.max_documents),
            ("memory.max_sessions", self.memory.max_sessions),
        ];
        for (name, value) in bounds {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::ValidationError(
                "retry.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }

        let timeouts = [
            ("timeouts.generation_secs", self.timeouts.generation_secs),
            ("timeouts.retrieval_secs", self.timeouts.retrieval_secs),
            ("timeouts.rerank_secs", self.timeouts.rerank_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Get provider by name
    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

impl StageModels {
    /// Stage settings paired with their config key
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &StageModelConfig)> {
        [
            ("planning", &self.planning),
            ("retrieval", &self.retrieval),
            ("analysis", &self.analysis),
            ("report", &self.report),
        ]
        .into_iter()
    }
}

// ============= Configuration Manager =============

/// Thread-safe configuration holder with lock-free reads and manual reload
pub struct ConfigManager {
    config: Arc<ArcSwap<QuarryConfig>>,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a manager and load the initial config from `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = QuarryConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: Some(path),
        })
    }

    /// Create a config manager directly from a config; `reload` is a no-op
    pub fn from_config(config: QuarryConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: None,
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<QuarryConfig> {
        self.config.load_full()
    }

    /// Re-read the configuration from disk, keeping the old one on error
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(ref path) = self.config_path else {
            return Ok(());
        };
        info!("Reloading configuration from {:?}", path);

        let new_config = QuarryConfig::load(path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Replace the live configuration after validating it
    pub fn update(&self, config: QuarryConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config.store(Arc::new(config));
        Ok(())
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
        }
    }
}
