//! Text-generation capability
//!
//! This module provides a unified interface over Large Language Model providers,
//! allowing the research stages to work with any supported backend.
//!
//! # Architecture
//!
//! - [`LLMClient`] - The core trait that all providers implement
//! - [`Provider`] - Runtime provider selection
//! - [`LLMClientFactory`] - Creates per-stage clients from `quarry.toml`
//! - [`StageModel`] - A client bound to one stage's settings, retries and timeout
//! - [`retry`] - Exponential backoff with jitter around every capability call
//!
//! # Supported Providers
//!
//! Enable providers via Cargo features:
//! - `ollama` - Local Ollama server (default)
//! - `openai` - OpenAI API and compatible endpoints
//!
//! # Example
//!
//! ```ignore
//! use quarry::llm::{LLMClientFactory, OutputFormat};
//!
//! let factory = LLMClientFactory::new(config);
//! let stages = factory.create_stage_models().await?;
//! let plan = stages.planning.generate(system, "Impact of remote work", OutputFormat::Json).await?;
//! ```

/// Core LLM client trait, provider selection and stage models.
pub mod client;
/// Backoff and timeout helper for capability calls.
pub mod retry;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{
    GenerationConstraints, LLMClient, LLMClientFactory, OutputFormat, Provider, StageModel,
    StageModels,
};
pub use retry::{RetryPolicy, with_retry};
