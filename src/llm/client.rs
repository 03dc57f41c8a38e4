//! LLM client abstractions and provider management
//!
//! This module provides a unified interface for the text-generation capability:
//! - **Ollama**: local inference (feature `ollama`, default)
//! - **OpenAI**: OpenAI API and compatible endpoints such as Fireworks or
//!   OpenRouter (feature `openai`)
//!
//! Stages never talk to a provider directly. They hold a [`StageModel`], which
//! pairs a client with the stage's generation settings and wraps every call in
//! the configured retry policy and timeout.

use crate::llm::retry::{RetryPolicy, with_retry};
use crate::types::{ResearchError, Result};
use crate::utils::toml_config::{ProviderConfig, QuarryConfig, StageModelConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Structural format a stage expects back from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    /// A single JSON object
    Json,
    /// A numbered list, one item per line
    List,
    Markdown,
}

impl OutputFormat {
    /// Instruction appended to system prompts so the model honours the format.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Text => None,
            OutputFormat::Json => Some(
                "Respond with a single valid JSON object only. Do not wrap it in code fences or add commentary.",
            ),
            OutputFormat::List => Some("Respond with a numbered list only, one item per line."),
            OutputFormat::Markdown => Some("Respond in Markdown."),
        }
    }
}

/// Per-call generation limits.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConstraints {
    pub max_tokens: u32,
    pub temperature: f32,
    pub format: OutputFormat,
}

impl Default for GenerationConstraints {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.2,
            format: OutputFormat::Text,
        }
    }
}

impl GenerationConstraints {
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

impl From<&StageModelConfig> for GenerationConstraints {
    fn from(config: &StageModelConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            format: OutputFormat::Text,
        }
    }
}

/// Text-generation capability used by every stage.
///
/// Implementations report failures through the transient variants of
/// [`ResearchError`] (`Timeout`, `RateLimited`, `Unavailable`) when a retry
/// could help, and `InvalidResponse` otherwise.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Generate a completion for `prompt` under a system instruction
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Provider enum for runtime selection
#[derive(Debug, Clone)]
pub enum Provider {
    /// OpenAI API provider (including compatible APIs)
    OpenAI {
        api_key: String,
        api_base: String,
        model: String,
    },

    /// Ollama local LLM provider
    Ollama { base_url: String, model: String },
}

impl Provider {
    /// Resolve a provider entry from the config, optionally overriding its model.
    ///
    /// API keys are read from the environment variable the entry names.
    pub fn from_config(config: &ProviderConfig, model: Option<&str>) -> Result<Self> {
        let model = model.unwrap_or(config.default_model()).to_string();
        match config {
            ProviderConfig::Ollama { base_url, .. } => Ok(Provider::Ollama {
                base_url: base_url.clone(),
                model,
            }),
            ProviderConfig::OpenAI {
                api_key_env,
                api_base,
                ..
            } => {
                let api_key = std::env::var(api_key_env).map_err(|_| {
                    ResearchError::Configuration(format!(
                        "Environment variable '{}' is not set",
                        api_key_env
                    ))
                })?;
                Ok(Provider::OpenAI {
                    api_key,
                    api_base: api_base.clone(),
                    model,
                })
            }
        }
    }

    /// Create a client instance for this provider
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the provider's cargo feature is
    /// disabled in this build.
    pub async fn create_client(&self) -> Result<Arc<dyn LLMClient>> {
        match self {
            #[cfg(feature = "openai")]
            Provider::OpenAI {
                api_key,
                api_base,
                model,
            } => Ok(Arc::new(super::openai::OpenAIClient::new(
                api_key.clone(),
                api_base.clone(),
                model.clone(),
            ))),

            #[cfg(feature = "ollama")]
            Provider::Ollama { base_url, model } => Ok(Arc::new(
                super::ollama::OllamaClient::new(base_url.clone(), model.clone()).await?,
            )),

            #[allow(unreachable_patterns)]
            other => Err(ResearchError::Configuration(format!(
                "{} provider is not enabled in this build; rebuild with the '{}' feature",
                other.name(),
                other.feature()
            ))),
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI { .. } => "OpenAI",
            Provider::Ollama { .. } => "Ollama",
        }
    }

    fn feature(&self) -> &'static str {
        match self {
            Provider::OpenAI { .. } => "openai",
            Provider::Ollama { .. } => "ollama",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Provider::OpenAI { model, .. } | Provider::Ollama { model, .. } => model,
        }
    }
}

// ============= Stage Models =============

/// A generation client bound to one stage's settings, retry policy and timeout.
#[derive(Clone)]
pub struct StageModel {
    client: Arc<dyn LLMClient>,
    constraints: GenerationConstraints,
    retry: RetryPolicy,
    timeout: Duration,
    label: &'static str,
}

impl StageModel {
    pub fn new(client: Arc<dyn LLMClient>, constraints: GenerationConstraints) -> Self {
        Self {
            client,
            constraints,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            label: "generate",
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, timeout: Duration) -> Self {
        self.retry = retry;
        self.timeout = timeout;
        self
    }

    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Generate with retries; the format hint is appended to the system prompt.
    pub async fn generate(&self, system: &str, prompt: &str, format: OutputFormat) -> Result<String> {
        let constraints = self.constraints.clone().with_format(format);
        let system = match format.hint() {
            Some(hint) => format!("{}\n\n{}", system, hint),
            None => system.to_string(),
        };
        let client = &self.client;

        with_retry(&self.retry, self.timeout, self.label, || {
            client.generate(&system, prompt, &constraints)
        })
        .await
    }
}

/// One [`StageModel`] per pipeline stage.
#[derive(Clone)]
pub struct StageModels {
    pub planning: StageModel,
    pub retrieval: StageModel,
    pub analysis: StageModel,
    pub report: StageModel,
}

impl StageModels {
    /// Every stage shares `client` with default settings; used by tests and
    /// embedders that bring their own client.
    pub fn uniform(client: Arc<dyn LLMClient>, retry: RetryPolicy, timeout: Duration) -> Self {
        let defaults = crate::utils::toml_config::StageModels::default();
        let stage = |settings: &StageModelConfig, label| {
            StageModel::new(Arc::clone(&client), settings.into())
                .with_retry(retry.clone(), timeout)
                .with_label(label)
        };
        Self {
            planning: stage(&defaults.planning, "planning"),
            retrieval: stage(&defaults.retrieval, "retrieval"),
            analysis: stage(&defaults.analysis, "analysis"),
            report: stage(&defaults.report, "report"),
        }
    }
}

/// Configuration-based client factory
///
/// Builds per-stage clients from `quarry.toml`, creating one client per
/// distinct provider/model pair.
pub struct LLMClientFactory {
    config: Arc<QuarryConfig>,
}

impl LLMClientFactory {
    pub fn new(config: Arc<QuarryConfig>) -> Self {
        Self { config }
    }

    /// The provider a stage resolves to
    pub fn provider_for(&self, settings: &StageModelConfig) -> Result<Provider> {
        let name = settings.provider.as_deref().unwrap_or(&self.config.llm.provider);
        let provider = self.config.get_provider(name).ok_or_else(|| {
            ResearchError::Configuration(format!("Provider '{}' is not defined", name))
        })?;
        Provider::from_config(provider, settings.model.as_deref())
    }

    /// Create the client for the default provider and its default model
    pub async fn create_default(&self) -> Result<Arc<dyn LLMClient>> {
        let settings = StageModelConfig {
            provider: None,
            model: None,
            temperature: 0.2,
            max_tokens: 2048,
        };
        self.provider_for(&settings)?.create_client().await
    }

    /// Build the stage models described by the configuration
    pub async fn create_stage_models(&self) -> Result<StageModels> {
        let mut clients = HashMap::new();
        let stages = &self.config.llm.stages;
        Ok(StageModels {
            planning: self.stage_model(&stages.planning, "planning", &mut clients).await?,
            retrieval: self.stage_model(&stages.retrieval, "retrieval", &mut clients).await?,
            analysis: self.stage_model(&stages.analysis, "analysis", &mut clients).await?,
            report: self.stage_model(&stages.report, "report", &mut clients).await?,
        })
    }

    async fn stage_model(
        &self,
        settings: &StageModelConfig,
        label: &'static str,
        clients: &mut HashMap<(String, String), Arc<dyn LLMClient>>,
    ) -> Result<StageModel> {
        let provider = self.provider_for(settings)?;
        let key = (provider.name().to_string(), provider.model().to_string());
        let client = match clients.get(&key) {
            Some(client) => Arc::clone(client),
            None => {
                let client = provider.create_client().await?;
                clients.insert(key, Arc::clone(&client));
                client
            }
        };
        Ok(StageModel::new(client, settings.into())
            .with_retry(RetryPolicy::from(&self.config.retry), self.config.timeouts.generation())
            .with_label(label))
    }
}
