//! Multi-stage research pipeline
//!
//! This module turns a research query into a cited report. A session moves
//! through a fixed sequence of stages, each backed by an external capability:
//!
//! - [`planner::Planner`] - Break the query into independent sub-task goals
//! - [`retrieval::RetrievalStage`] - Gather, deduplicate and rerank documents per sub-task
//! - [`analysis::AnalysisStage`] - Extract sourced insights from those documents
//! - [`report::ReportStage`] - Synthesize all findings into a sectioned report
//! - [`coordinator::ResearchCoordinator`] - Sequences the stages and records progress
//!
//! # Usage
//!
//! ```ignore
//! use quarry::research::ResearchCoordinator;
//!
//! let coordinator = ResearchCoordinator::from_config(&config, memory).await?;
//! let report = coordinator
//!     .research("Impact of remote work on urban real estate", None)
//!     .await?;
//!
//! println!("{}", report.to_markdown());
//! ```
//!
//! # Research Workflow
//!
//! 1. **Planning** - Decompose the query; falls back to the query itself
//! 2. **Retrieval** - Sub-tasks run concurrently up to the configured limit
//! 3. **Analysis** - Starts for a sub-task once its retrieval finished
//! 4. **Report** - One synthesis call; falls back to a mechanical report
//!
//! Capability failures inside a sub-task fail only that sub-task. Generated
//! output that cannot be parsed is re-prompted once before the stage falls
//! back to its degraded output.

pub mod analysis;
/// Stage sequencing, cancellation and event streaming.
pub mod coordinator;
pub mod parsing;
pub mod planner;
pub mod prompts;
pub mod report;
pub mod retrieval;

pub use analysis::AnalysisStage;
pub use coordinator::ResearchCoordinator;
pub use planner::Planner;
pub use report::{ReportStage, mechanical_report};
pub use retrieval::RetrievalStage;
