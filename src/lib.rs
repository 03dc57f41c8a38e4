//! # quarry
//!
//! Multi-stage deep research orchestration. A research query is planned into
//! independent sub-tasks; each sub-task retrieves and analyzes sources, and a
//! final stage synthesizes a sectioned report whose citations point only at
//! documents that were actually retrieved.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use quarry::{MemoryStore, QuarryConfig, ResearchCoordinator};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = QuarryConfig::load_or_default("quarry.toml")?;
//!     let memory = Arc::new(MemoryStore::new(&config.memory));
//!     let coordinator = ResearchCoordinator::from_config(&config, memory).await?;
//!
//!     let session_id = coordinator.submit("Impact of remote work on urban real estate", None)?;
//!     let mut events = Box::pin(coordinator.events(&session_id, 0));
//!     tokio::spawn(async move {
//!         while let Some(event) = events.next().await {
//!             println!("[{}] {} {}", event.seq, event.stage, event.message);
//!         }
//!     });
//!
//!     let report = coordinator.run(&session_id).await?;
//!     println!("{}", report.to_markdown());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama local inference (default) |
//! | `openai` | OpenAI API and compatible endpoints |
//! | `local-rerank` | Local cross-encoder reranking via fastembed |
//!
//! ## Modules
//!
//! - [`research`] - Planner, retrieval, analysis and report stages plus the coordinator
//! - [`memory`] - Session store, progress event log and conversation context
//! - [`llm`] - Text-generation clients, stage models and retries
//! - [`rag`] - Source retrievers and rerankers
//! - [`types`] - Sessions, reports, progress events and errors
//! - [`utils`] - `quarry.toml` configuration

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Command-line parsing and terminal output.
pub mod cli;
/// LLM provider clients and abstractions.
pub mod llm;
/// Session store and conversation context.
pub mod memory;
/// Source retrieval and reranking.
pub mod rag;
/// The research pipeline.
pub mod research;
/// Core types (sessions, reports, events, errors).
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use llm::{LLMClient, LLMClientFactory, Provider};
pub use memory::MemoryStore;
pub use research::ResearchCoordinator;
pub use types::{Report, ResearchError, Result};
pub use utils::toml_config::{ConfigManager, QuarryConfig};
