use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, TryStreamExt, stream};
use serde_json::json;

use crate::llm::{LLMClientFactory, RetryPolicy, StageModels};
use crate::memory::{MemoryStore, find_repeated_turn, format_conversation_context};
use crate::rag::{Reranker, SourceRetriever, build_reranker, build_retriever};
use crate::research::analysis::AnalysisStage;
use crate::research::planner::Planner;
use crate::research::report::ReportStage;
use crate::research::retrieval::RetrievalStage;
use crate::types::{
    Phase, ProgressEvent, ProgressUpdate, Report, ResearchError, ResearchPlan, Result, Session,
    SessionStatus, Stage, SubTask, SubTaskStatus,
};
use crate::utils::toml_config::{QuarryConfig, ResearchConfig};

/// Drives a session through planning, per-sub-task retrieval and analysis,
/// and report synthesis, recording every step in the [`MemoryStore`].
///
/// Methods take `&self`; share the coordinator behind an `Arc` to cancel or
/// stream a session while it runs.
pub struct ResearchCoordinator {
    memory: Arc<MemoryStore>,
    planner: Planner,
    retrieval: RetrievalStage,
    analysis: AnalysisStage,
    report: ReportStage,
    settings: ResearchConfig,
}

impl ResearchCoordinator {
    pub fn new(
        memory: Arc<MemoryStore>,
        models: StageModels,
        retriever: Arc<dyn SourceRetriever>,
        reranker: Option<Arc<dyn Reranker>>,
        config: &QuarryConfig,
    ) -> Self {
        let settings = config.research.clone();
        let retrieval = RetrievalStage::new(retriever, &config.retrieval)
            .with_reranker(reranker)
            .with_retry(RetryPolicy::from(&config.retry), &config.timeouts);

        Self {
            memory,
            planner: Planner::new(models.planning, settings.max_subtasks),
            retrieval,
            analysis: AnalysisStage::new(models.analysis, settings.analysis_context_tokens),
            report: ReportStage::new(models.report),
            settings,
        }
    }

    /// Build every stage and capability from the configuration.
    pub async fn from_config(config: &QuarryConfig, memory: Arc<MemoryStore>) -> Result<Self> {
        let factory = LLMClientFactory::new(Arc::new(config.clone()));
        let models = factory.create_stage_models().await?;
        let retriever = build_retriever(
            &config.retrieval,
            models.retrieval.clone(),
            config.timeouts.retrieval(),
        );
        let reranker = build_reranker(&config.reranker, config.timeouts.rerank());

        tracing::info!(
            retriever = retriever.name(),
            reranker = reranker.as_ref().map(|r| r.name()).unwrap_or("none"),
            planning_model = models.planning.model_name(),
            "Research coordinator ready"
        );
        Ok(Self::new(memory, models, retriever, reranker, config))
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    // ============= Session lifecycle =============

    /// Validate the query and create its session; returns the session id.
    ///
    /// Sessions older than the configured TTL are swept first.
    pub fn submit(&self, query: &str, conversation_id: Option<String>) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResearchError::InvalidInput("query is empty".to_string()));
        }
        let chars = query.chars().count();
        if chars > self.settings.max_query_chars {
            return Err(ResearchError::InvalidInput(format!(
                "query is {} characters, the limit is {}",
                chars, self.settings.max_query_chars
            )));
        }

        self.memory.evict_expired();
        let session = self.memory.create_session(query, conversation_id);
        self.memory.append_progress_event(
            &session.id,
            ProgressUpdate::started(Stage::Session, "Session created")
                .with_payload(json!({ "query": query })),
        )?;
        tracing::info!(session_id = %session.id, "Submitted research query");
        Ok(session.id)
    }

    /// Run a submitted session to completion.
    ///
    /// Returns the report, or the reason the session did not complete. A
    /// cancelled session yields [`ResearchError::SessionClosed`] carrying the
    /// cancellation reason.
    pub async fn run(&self, session_id: &str) -> Result<Report> {
        match self.pipeline(session_id).await {
            Ok(report) => Ok(report),
            Err(ResearchError::SessionClosed(_)) => {
                let reason = self
                    .memory
                    .get_session(session_id)
                    .ok()
                    .and_then(|s| s.failure_reason)
                    .unwrap_or_else(|| format!("session {} is closed", session_id));
                tracing::info!(session_id, reason = %reason, "Session stopped");
                Err(ResearchError::SessionClosed(reason))
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "Session failed");
                if let Err(closed) = self.memory.transition(
                    session_id,
                    SessionStatus::Failed,
                    Some(e.to_string()),
                    ProgressUpdate::failed(Stage::Session, e.to_string()),
                ) {
                    tracing::warn!(session_id, error = %closed, "Could not record session failure");
                }
                Err(e)
            }
        }
    }

    /// Submit and run in one call.
    pub async fn research(&self, query: &str, conversation_id: Option<String>) -> Result<Report> {
        let session_id = self.submit(query, conversation_id)?;
        self.run(&session_id).await
    }

    /// Cooperatively cancel a session.
    ///
    /// The session fails immediately; calls already in flight finish, but no
    /// further stage starts for it.
    pub fn cancel(&self, session_id: &str, reason: &str) -> Result<()> {
        let event = self.memory.transition(
            session_id,
            SessionStatus::Failed,
            Some(format!("cancelled: {}", reason)),
            ProgressUpdate::failed(Stage::Session, format!("Session cancelled: {}", reason)),
        )?;
        tracing::info!(session_id, seq = event.seq, reason, "Session cancelled");
        Ok(())
    }

    pub fn session(&self, session_id: &str) -> Result<Session> {
        self.memory.get_session(session_id)
    }

    /// The stored report, once the session has one. Never regenerated.
    pub fn report(&self, session_id: &str) -> Result<Option<Report>> {
        Ok(self.memory.get_session(session_id)?.report)
    }

    /// Progress events after `since_seq`: stored history first, then live
    /// appends. Ends after the terminal event or when the session is evicted.
    pub fn events(
        &self,
        session_id: &str,
        since_seq: u64,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let memory = Arc::clone(&self.memory);
        let session_id = session_id.to_string();

        async_stream::stream! {
            // subscribe before the first read so no append is missed
            if let Ok(mut rx) = memory.subscribe(&session_id) {
                let mut last = since_seq;
                'follow: loop {
                    let Ok(events) = memory.list_progress_events(&session_id, last) else {
                        break;
                    };
                    for event in events {
                        last = event.seq;
                        let terminal = event.terminal;
                        yield event;
                        if terminal {
                            break 'follow;
                        }
                    }
                    if memory.is_log_closed(&session_id).unwrap_or(true) {
                        break;
                    }
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // ============= Pipeline =============

    fn emit(&self, session_id: &str, update: ProgressUpdate) -> Result<ProgressEvent> {
        self.memory.append_progress_event(session_id, update)
    }

    async fn pipeline(&self, session_id: &str) -> Result<Report> {
        let session = self.memory.get_session(session_id)?;
        let prior_context = self.prior_context(&session)?;

        self.emit(session_id, ProgressUpdate::started(Stage::Planning, "Planning research"))?;
        let plan = self
            .planner
            .plan(&session.query, prior_context.as_deref())
            .await;
        if plan.degraded {
            tracing::warn!(session_id, "Using fallback plan");
        }

        let subtasks: Vec<SubTask> = plan
            .goals
            .iter()
            .map(|goal| SubTask::new(session_id, goal))
            .collect();
        let stored_plan = plan.clone();
        self.memory
            .update_session(session_id, move |s| s.plan = Some(stored_plan))?;
        self.memory.append_subtasks(session_id, subtasks.clone())?;
        self.emit(
            session_id,
            ProgressUpdate::completed(
                Stage::Planning,
                format!("Planned {} sub-task(s)", subtasks.len()),
            )
            .with_payload(json!({
                "goals": plan.goals,
                "subtask_ids": subtasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
                "degraded": plan.degraded,
            })),
        )?;

        self.memory.transition(
            session_id,
            SessionStatus::Researching,
            None,
            ProgressUpdate::new(Stage::Session, Phase::Started, "Researching sub-tasks")
                .with_payload(json!({ "status": SessionStatus::Researching.to_string() })),
        )?;

        let parallel = self.settings.max_parallel_subtasks.max(1);
        stream::iter(subtasks.into_iter().map(Ok))
            .try_for_each_concurrent(parallel, |task| self.run_subtask(session_id, &plan, task))
            .await?;

        let session = self.memory.get_session(session_id)?;
        if !session.research_settled() {
            return Err(ResearchError::Internal(format!(
                "session {} reached synthesis with unsettled sub-tasks",
                session_id
            )));
        }

        self.memory.transition(
            session_id,
            SessionStatus::Synthesizing,
            None,
            ProgressUpdate::new(Stage::Session, Phase::Started, "Synthesizing report")
                .with_payload(json!({ "status": SessionStatus::Synthesizing.to_string() })),
        )?;
        self.synthesize(session_id, &plan).await
    }

    /// Earlier completed turns of the session's conversation, formatted for planning.
    fn prior_context(&self, session: &Session) -> Result<Option<String>> {
        let Some(conversation_id) = session.conversation_id.as_deref() else {
            return Ok(None);
        };
        let prior = self
            .memory
            .conversation_context(conversation_id, Some(&session.id));
        if prior.is_empty() {
            return Ok(None);
        }

        if let Some(earlier) = find_repeated_turn(&prior, &session.query) {
            self.emit(
                &session.id,
                ProgressUpdate::completed(
                    Stage::Memory,
                    "This query was already researched earlier in the conversation; planning will look for new angles",
                )
                .with_payload(json!({ "previous_session_id": earlier.id })),
            )?;
        }

        let context =
            format_conversation_context(&prior, self.settings.conversation_context_tokens);
        self.emit(
            &session.id,
            ProgressUpdate::completed(
                Stage::Memory,
                format!("Loaded {} earlier turn(s) of the conversation", prior.len()),
            ),
        )?;
        Ok((!context.is_empty()).then_some(context))
    }

    /// Retrieval then analysis for one sub-task.
    ///
    /// Capability failures mark the sub-task Failed and return `Ok`; only
    /// session-level errors (closed or evicted) propagate.
    async fn run_subtask(&self, session_id: &str, plan: &ResearchPlan, task: SubTask) -> Result<()> {
        let subtask_id = task.id.as_str();

        self.memory.update_subtask(session_id, subtask_id, |t| {
            t.status = SubTaskStatus::Retrieving;
        })?;
        self.emit(
            session_id,
            ProgressUpdate::started(Stage::Retrieval, format!("Retrieving: {}", task.goal))
                .for_subtask(subtask_id),
        )?;

        let documents = match self.retrieval.retrieve(&task.goal, &plan.context).await {
            Ok(documents) => documents,
            Err(e) => return self.fail_subtask(session_id, subtask_id, Stage::Retrieval, e),
        };

        let count = documents.len();
        let stored = documents.clone();
        self.memory.update_subtask(session_id, subtask_id, move |t| {
            t.documents = stored;
            t.status = SubTaskStatus::Analyzing;
        })?;
        self.emit(
            session_id,
            ProgressUpdate::completed(Stage::Retrieval, format!("Retrieved {} document(s)", count))
                .for_subtask(subtask_id)
                .with_payload(json!({
                    "documents": count,
                    "reranked": self.retrieval.has_reranker(),
                })),
        )?;

        self.emit(
            session_id,
            ProgressUpdate::started(Stage::Analysis, format!("Analyzing: {}", task.goal))
                .for_subtask(subtask_id),
        )?;
        let findings = match self
            .analysis
            .analyze(&task.goal, &plan.context, &documents)
            .await
        {
            Ok(findings) => findings,
            Err(e) => return self.fail_subtask(session_id, subtask_id, Stage::Analysis, e),
        };

        let payload = json!({
            "summary": findings.summary,
            "insights": findings.insights.len(),
            "degraded": findings.degraded,
        });
        self.memory.update_subtask(session_id, subtask_id, move |t| {
            t.findings = Some(findings);
            t.status = SubTaskStatus::Done;
        })?;
        self.emit(
            session_id,
            ProgressUpdate::completed(Stage::Analysis, "Analysis complete")
                .for_subtask(subtask_id)
                .with_payload(payload),
        )?;
        Ok(())
    }

    fn fail_subtask(
        &self,
        session_id: &str,
        subtask_id: &str,
        stage: Stage,
        error: ResearchError,
    ) -> Result<()> {
        tracing::warn!(session_id, subtask_id, %stage, error = %error, "Sub-task failed");
        let message = error.to_string();
        let reason = message.clone();
        self.memory.update_subtask(session_id, subtask_id, move |t| {
            t.status = SubTaskStatus::Failed;
            t.error = Some(reason);
        })?;
        self.emit(
            session_id,
            ProgressUpdate::failed(stage, message).for_subtask(subtask_id),
        )?;
        Ok(())
    }

    async fn synthesize(&self, session_id: &str, plan: &ResearchPlan) -> Result<Report> {
        self.emit(session_id, ProgressUpdate::started(Stage::Report, "Writing report"))?;
        let session = self.memory.get_session(session_id)?;

        let mut report = self
            .report
            .synthesize(&session.query, plan, &session.subtasks)
            .await;
        let elapsed = Utc::now().signed_duration_since(session.created_at);
        report.metadata.elapsed_ms = u64::try_from(elapsed.num_milliseconds()).unwrap_or(0);

        self.memory.set_report(session_id, report.clone())?;
        self.emit(
            session_id,
            ProgressUpdate::completed(
                Stage::Report,
                format!("Report ready with {} section(s)", report.sections.len()),
            )
            .with_payload(json!({
                "degraded": report.metadata.degraded,
                "warnings": report.metadata.warnings.len(),
            })),
        )?;
        self.memory.transition(
            session_id,
            SessionStatus::Complete,
            None,
            ProgressUpdate::completed(Stage::Session, "Research complete")
                .with_payload(serde_json::to_value(&report)?),
        )?;
        tracing::info!(
            session_id,
            sections = report.sections.len(),
            elapsed_ms = report.metadata.elapsed_ms,
            "Research complete"
        );
        Ok(report)
    }
}
