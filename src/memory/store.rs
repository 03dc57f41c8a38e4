//! Keyed in-process session store.
//!
//! Every session lives behind its own lock so that concurrent sub-task
//! pipelines mutate it atomically without any locking on the caller side.
//! The outer LRU map is only held long enough to look an entry up.

use crate::types::{
    ProgressEvent, ProgressUpdate, Report, ResearchError, Result, Session, SessionStatus, SubTask,
};
use crate::utils::toml_config::MemoryConfig;
use chrono::{Duration as ChronoDuration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Snapshot format version written by [`MemoryStore::snapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// Reason recorded on sessions restored from a snapshot mid-flight.
pub const INTERRUPTED_REASON: &str = "interrupted: the process stopped before the session finished";

struct SessionEntry {
    session: Session,
    events: Vec<ProgressEvent>,
    /// Set once the terminal event has been appended
    closed: bool,
    /// Publishes the latest sequence number to subscribers
    notify: watch::Sender<u64>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            session,
            events: Vec::new(),
            closed: false,
            notify,
        }
    }

    fn last_seq(&self) -> u64 {
        self.events.last().map(|e| e.seq).unwrap_or(0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.session.is_terminal() {
            return Err(ResearchError::SessionClosed(self.session.id.clone()));
        }
        Ok(())
    }

    fn push_event(&mut self, update: ProgressUpdate) -> Result<ProgressEvent> {
        if self.closed {
            return Err(ResearchError::SessionClosed(self.session.id.clone()));
        }
        let event = ProgressEvent::from_update(&self.session.id, self.last_seq() + 1, update);
        if event.terminal {
            self.closed = true;
        }
        self.events.push(event.clone());
        self.notify.send_replace(event.seq);
        Ok(event)
    }

    fn touch(&mut self) {
        self.session.updated_at = Utc::now();
    }
}

/// A session with its full event log, as persisted in snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: Session,
    pub events: Vec<ProgressEvent>,
}

/// Serializable image of the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub version: u32,
    pub sessions: Vec<SessionRecord>,
}

/// In-process memory store for research sessions and their progress logs.
pub struct MemoryStore {
    sessions: Mutex<LruCache<String, Arc<Mutex<SessionEntry>>>>,
    ttl: ChronoDuration,
}

impl MemoryStore {
    pub fn new(config: &MemoryConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN);
        let ttl = i64::try_from(config.session_ttl_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or(ChronoDuration::MAX);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn entry(&self, session_id: &str) -> Result<Arc<Mutex<SessionEntry>>> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ResearchError::NotFound(format!("session {}", session_id)))
    }

    fn insert(&self, entry: SessionEntry) {
        let id = entry.session.id.clone();
        if let Some((evicted, _)) = self.sessions.lock().push(id.clone(), Arc::new(Mutex::new(entry)))
            && evicted != id
        {
            info!(session_id = %evicted, "Evicted least recently used session");
        }
    }

    // ============= Sessions =============

    /// Create a new session in the Planning state.
    pub fn create_session(&self, query: &str, conversation_id: Option<String>) -> Session {
        let session = Session::new(query, conversation_id);
        debug!(session_id = %session.id, "Created session");
        self.insert(SessionEntry::new(session.clone()));
        session
    }

    /// Clone of the current session state.
    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        let entry = self.entry(session_id)?;
        let guard = entry.lock();
        Ok(guard.session.clone())
    }

    /// Apply `mutation` to a non-terminal session atomically.
    pub fn update_session<R>(
        &self,
        session_id: &str,
        mutation: impl FnOnce(&mut Session) -> R,
    ) -> Result<R> {
        let entry = self.entry(session_id)?;
        let mut guard = entry.lock();
        guard.ensure_open()?;
        let result = mutation(&mut guard.session);
        guard.touch();
        Ok(result)
    }

    /// Append planned sub-tasks to a session, preserving their order.
    pub fn append_subtasks(&self, session_id: &str, subtasks: Vec<SubTask>) -> Result<()> {
        let entry = self.entry(session_id)?;
        let mut guard = entry.lock();
        guard.ensure_open()?;
        if let Some(task) = subtasks.iter().find(|t| t.session_id != session_id) {
            return Err(ResearchError::InvalidInput(format!(
                "sub-task {} belongs to session {}",
                task.id, task.session_id
            )));
        }
        guard.session.subtasks.extend(subtasks);
        guard.touch();
        Ok(())
    }

    /// Apply `mutation` to one sub-task atomically.
    ///
    /// The mutation runs on a copy; it is committed only if the sub-task's
    /// findings still reference documents held by that same sub-task.
    pub fn update_subtask(
        &self,
        session_id: &str,
        subtask_id: &str,
        mutation: impl FnOnce(&mut SubTask),
    ) -> Result<SubTask> {
        let entry = self.entry(session_id)?;
        let mut guard = entry.lock();
        guard.ensure_open()?;

        let current = guard
            .session
            .subtask(subtask_id)
            .ok_or_else(|| ResearchError::NotFound(format!("sub-task {}", subtask_id)))?;
        let mut updated = current.clone();
        mutation(&mut updated);

        if let Some(ref findings) = updated.findings {
            let held: HashSet<&str> = updated.documents.iter().map(|d| d.source_id.as_str()).collect();
            if let Some(orphan) = findings
                .insights
                .iter()
                .flat_map(|i| i.sources.iter())
                .find(|s| !held.contains(s.as_str()))
            {
                return Err(ResearchError::InvalidInput(format!(
                    "findings for {} reference unknown document {}",
                    subtask_id, orphan
                )));
            }
        }

        if let Some(slot) = guard.session.subtask_mut(subtask_id) {
            *slot = updated.clone();
        }
        guard.touch();
        Ok(updated)
    }

    /// Move the session to `next` and append `update` in the same step.
    ///
    /// Moving to a terminal state marks the event terminal and closes the log.
    pub fn transition(
        &self,
        session_id: &str,
        next: SessionStatus,
        reason: Option<String>,
        update: ProgressUpdate,
    ) -> Result<ProgressEvent> {
        let entry = self.entry(session_id)?;
        let mut guard = entry.lock();
        let current = guard.session.status;
        if current.is_terminal() || guard.closed {
            return Err(ResearchError::SessionClosed(session_id.to_string()));
        }
        if !current.can_transition_to(next) {
            return Err(ResearchError::Internal(format!(
                "invalid transition {} -> {} for session {}",
                current, next, session_id
            )));
        }

        guard.session.status = next;
        if next == SessionStatus::Failed {
            guard.session.failure_reason = reason;
        }
        guard.touch();

        let update = if next.is_terminal() { update.terminal() } else { update };
        let event = guard.push_event(update)?;
        debug!(session_id, from = %current, to = %next, seq = event.seq, "Session transition");
        Ok(event)
    }

    /// Store the final report.
    ///
    /// Every citation must resolve to a document held by one of the session's
    /// sub-tasks, and a session only ever receives one report.
    pub fn set_report(&self, session_id: &str, report: Report) -> Result<()> {
        let entry = self.entry(session_id)?;
        let mut guard = entry.lock();
        guard.ensure_open()?;
        if guard.session.report.is_some() {
            return Err(ResearchError::InvalidInput(format!(
                "session {} already has a report",
                session_id
            )));
        }

        {
            let known = guard.session.known_sources();
            if let Some(unknown) = report.citations().find(|c| !known.contains(c)) {
                return Err(ResearchError::InvalidInput(format!(
                    "report cites unknown source {}",
                    unknown
                )));
            }
        }

        guard.session.report = Some(report);
        guard.touch();
        Ok(())
    }

    pub fn remove_session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .pop(session_id)
            .map(|entry| entry.lock().session.clone())
    }

    /// Evict sessions untouched for longer than the configured TTL.
    pub fn evict_expired(&self) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.ttl) else {
            return 0;
        };
        let mut sessions = self.sessions.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.lock().session.updated_at <= cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.pop(id);
            debug!(session_id = %id, "Evicted expired session");
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Evicted expired sessions");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ============= Progress Events =============

    /// Append an event, assigning the next sequence number under the session lock.
    ///
    /// The terminal event is only ever written by [`MemoryStore::transition`],
    /// together with the terminal status.
    pub fn append_progress_event(
        &self,
        session_id: &str,
        update: ProgressUpdate,
    ) -> Result<ProgressEvent> {
        if update.terminal {
            return Err(ResearchError::InvalidInput(format!(
                "terminal events for session {} come from a status transition",
                session_id
            )));
        }
        let entry = self.entry(session_id)?;
        let mut guard = entry.lock();
        guard.push_event(update)
    }

    /// Events with a sequence number greater than `since_seq`, in order.
    pub fn list_progress_events(&self, session_id: &str, since_seq: u64) -> Result<Vec<ProgressEvent>> {
        let entry = self.entry(session_id)?;
        let guard = entry.lock();
        // seq n lives at index n - 1
        let start = usize::try_from(since_seq).unwrap_or(usize::MAX).min(guard.events.len());
        Ok(guard.events[start..].to_vec())
    }

    /// Whether the terminal event has been appended.
    pub fn is_log_closed(&self, session_id: &str) -> Result<bool> {
        let entry = self.entry(session_id)?;
        let closed = entry.lock().closed;
        Ok(closed)
    }

    /// Watch the latest sequence number of a session's log.
    ///
    /// The sender is dropped with the session, so receivers observe eviction
    /// as a closed channel.
    pub fn subscribe(&self, session_id: &str) -> Result<watch::Receiver<u64>> {
        let entry = self.entry(session_id)?;
        let rx = entry.lock().notify.subscribe();
        Ok(rx)
    }

    // ============= Conversations =============

    /// Completed sessions of a conversation, oldest first.
    pub fn conversation_context(&self, conversation_id: &str, exclude: Option<&str>) -> Vec<Session> {
        let entries: Vec<Arc<Mutex<SessionEntry>>> =
            self.sessions.lock().iter().map(|(_, e)| Arc::clone(e)).collect();

        let mut sessions: Vec<Session> = entries
            .iter()
            .filter_map(|entry| {
                let guard = entry.lock();
                let session = &guard.session;
                let matches = session.conversation_id.as_deref() == Some(conversation_id)
                    && session.status == SessionStatus::Complete
                    && Some(session.id.as_str()) != exclude;
                matches.then(|| session.clone())
            })
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    // ============= Snapshots =============

    /// Copy every session and its event log, least recently used first.
    pub fn snapshot(&self) -> MemorySnapshot {
        let entries: Vec<Arc<Mutex<SessionEntry>>> = self
            .sessions
            .lock()
            .iter()
            .rev()
            .map(|(_, e)| Arc::clone(e))
            .collect();

        let sessions = entries
            .iter()
            .map(|entry| {
                let guard = entry.lock();
                SessionRecord {
                    session: guard.session.clone(),
                    events: guard.events.clone(),
                }
            })
            .collect();

        MemorySnapshot {
            version: SNAPSHOT_VERSION,
            sessions,
        }
    }

    /// Load sessions from a snapshot, replacing any with the same id.
    ///
    /// Sessions that were still running when the snapshot was taken have no
    /// pipeline left to finish them; they are failed with an interruption
    /// reason and their log is closed.
    pub fn restore(&self, snapshot: MemorySnapshot) -> Result<usize> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ResearchError::InvalidInput(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let count = snapshot.sessions.len();
        for record in snapshot.sessions {
            let mut entry = SessionEntry::new(record.session);
            entry.closed = record.events.last().is_some_and(|e| e.terminal);
            entry.events = record.events;
            let seq = entry.last_seq();
            entry.notify.send_replace(seq);

            if !entry.session.is_terminal() {
                warn!(session_id = %entry.session.id, "Restored unfinished session as failed");
                entry.session.status = SessionStatus::Failed;
                entry.session.failure_reason = Some(INTERRUPTED_REASON.to_string());
                if !entry.closed {
                    entry.push_event(
                        ProgressUpdate::failed(crate::types::Stage::Session, INTERRUPTED_REASON)
                            .terminal(),
                    )?;
                }
            }
            self.insert(entry);
        }
        Ok(count)
    }

    pub async fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), "Saved memory snapshot");
        Ok(())
    }

    /// Restore from a snapshot file; a missing file restores nothing.
    pub async fn load_from_path(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let snapshot: MemorySnapshot = serde_json::from_slice(&bytes)?;
        let count = self.restore(snapshot)?;
        info!(path = %path.display(), sessions = count, "Loaded memory snapshot");
        Ok(count)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Confidence, Document, Findings, Insight, ReportMetadata, ReportSection, Stage,
        SubTaskStatus,
    };
    use std::sync::Arc;

    fn store_with(max_sessions: usize, ttl: u64) -> MemoryStore {
        MemoryStore::new(&MemoryConfig {
            max_sessions,
            session_ttl_secs: ttl,
            snapshot_path: None,
        })
    }

    fn report_citing(query: &str, source: &str) -> Report {
        Report {
            query: query.into(),
            summary: "summary".into(),
            sections: vec![ReportSection {
                heading: "h".into(),
                body: "b".into(),
                citations: vec![source.into()],
                subtask_id: None,
            }],
            sources: vec![],
            metadata: ReportMetadata::default(),
        }
    }

    fn insight(source: &str) -> Insight {
        Insight {
            text: "vacancy rose".into(),
            sources: vec![source.into()],
            confidence: Confidence::High,
            tag: None,
        }
    }

    #[test]
    fn test_create_and_get_session() {
        let store = MemoryStore::default();
        let session = store.create_session("remote work", None);
        let fetched = store.get_session(&session.id).unwrap();
        assert_eq!(fetched.query, "remote work");
        assert_eq!(fetched.status, SessionStatus::Planning);
        assert!(matches!(
            store.get_session("missing"),
            Err(ResearchError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_subtask_rejects_foreign_references() {
        let store = MemoryStore::default();
        let session = store.create_session("q", None);
        let task = SubTask::new(&session.id, "goal");
        let task_id = task.id.clone();
        store.append_subtasks(&session.id, vec![task]).unwrap();

        let result = store.update_subtask(&session.id, &task_id, |t| {
            t.documents.push(Document::new("https://a.example", "A", "a", 0.9));
            t.findings = Some(Findings {
                summary: "s".into(),
                insights: vec![insight("https://elsewhere.example")],
                ..Default::default()
            });
        });
        assert!(matches!(result, Err(ResearchError::InvalidInput(_))));

        // nothing from the rejected mutation is visible
        let stored = store.get_session(&session.id).unwrap();
        assert!(stored.subtasks[0].documents.is_empty());
        assert!(stored.subtasks[0].findings.is_none());
    }

    #[test]
    fn test_update_subtask_commits_valid_mutation() {
        let store = MemoryStore::default();
        let session = store.create_session("q", None);
        let task = SubTask::new(&session.id, "goal");
        let task_id = task.id.clone();
        store.append_subtasks(&session.id, vec![task]).unwrap();

        let updated = store
            .update_subtask(&session.id, &task_id, |t| {
                t.status = SubTaskStatus::Done;
                t.documents.push(Document::new("https://a.example", "A", "a", 0.9));
                t.findings = Some(Findings {
                    summary: "s".into(),
                    insights: vec![insight("https://a.example")],
                    ..Default::default()
                });
            })
            .unwrap();
        assert_eq!(updated.status, SubTaskStatus::Done);
        assert_eq!(
            store.get_session(&session.id).unwrap().subtasks[0].status,
            SubTaskStatus::Done
        );
    }

    #[test]
    fn test_set_report_validates_citations_and_is_write_once() {
        let store = MemoryStore::default();
        let session = store.create_session("q", None);
        let mut task = SubTask::new(&session.id, "goal");
        task.documents.push(Document::new("https://a.example", "A", "a", 0.9));
        store.append_subtasks(&session.id, vec![task]).unwrap();

        assert!(matches!(
            store.set_report(&session.id, report_citing("q", "https://ghost.example")),
            Err(ResearchError::InvalidInput(_))
        ));
        store
            .set_report(&session.id, report_citing("q", "https://a.example"))
            .unwrap();
        assert!(store
            .set_report(&session.id, report_citing("q", "https://a.example"))
            .is_err());
    }

    #[test]
    fn test_transitions_close_session() {
        let store = MemoryStore::default();
        let session = store.create_session("q", None);
        let id = session.id.clone();

        store
            .transition(&id, SessionStatus::Researching, None, ProgressUpdate::completed(Stage::Planning, "planned"))
            .unwrap();
        assert!(matches!(
            store.transition(&id, SessionStatus::Planning, None, ProgressUpdate::started(Stage::Planning, "again")),
            Err(ResearchError::Internal(_))
        ));

        let event = store
            .transition(
                &id,
                SessionStatus::Failed,
                Some("cancelled by caller".into()),
                ProgressUpdate::failed(Stage::Session, "cancelled"),
            )
            .unwrap();
        assert!(event.terminal);

        let stored = store.get_session(&id).unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("cancelled by caller"));

        assert!(matches!(
            store.update_session(&id, |_| ()),
            Err(ResearchError::SessionClosed(_))
        ));
        assert!(matches!(
            store.append_progress_event(&id, ProgressUpdate::started(Stage::Retrieval, "late")),
            Err(ResearchError::SessionClosed(_))
        ));
        assert!(store.is_log_closed(&id).unwrap());
    }

    #[test]
    fn test_terminal_event_requires_a_transition() {
        let store = MemoryStore::default();
        let session = store.create_session("q", None);

        assert!(matches!(
            store.append_progress_event(
                &session.id,
                ProgressUpdate::failed(Stage::Session, "done early").terminal()
            ),
            Err(ResearchError::InvalidInput(_))
        ));
        assert!(!store.is_log_closed(&session.id).unwrap());
        assert!(store.list_progress_events(&session.id, 0).unwrap().is_empty());

        store
            .transition(
                &session.id,
                SessionStatus::Failed,
                Some("stopped".into()),
                ProgressUpdate::failed(Stage::Session, "stopped"),
            )
            .unwrap();
        let stored = store.get_session(&session.id).unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(store.list_progress_events(&session.id, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_event_sequence_is_gap_free_under_concurrency() {
        let store = Arc::new(MemoryStore::default());
        let session = store.create_session("q", None);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                let id = session.id.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .append_progress_event(
                                &id,
                                ProgressUpdate::started(Stage::Retrieval, format!("{}-{}", worker, i)),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = store.list_progress_events(&session.id, 0).unwrap();
        assert_eq!(events.len(), 400);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.seq, i as u64 + 1);
        }

        let tail = store.list_progress_events(&session.id, 395).unwrap();
        assert_eq!(tail.first().map(|e| e.seq), Some(396));
        assert!(store.list_progress_events(&session.id, 1000).unwrap().is_empty());
    }

    #[test]
    fn test_lru_eviction_makes_session_not_found() {
        let store = store_with(2, 3600);
        let first = store.create_session("one", None);
        let _second = store.create_session("two", None);
        let _third = store.create_session("three", None);

        assert_eq!(store.len(), 2);
        assert!(matches!(
            store.update_session(&first.id, |_| ()),
            Err(ResearchError::NotFound(_))
        ));
    }

    #[test]
    fn test_evict_expired_with_zero_ttl() {
        let store = store_with(8, 0);
        store.create_session("one", None);
        store.create_session("two", None);
        assert_eq!(store.evict_expired(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_observes_appends_and_eviction() {
        let store = MemoryStore::default();
        let session = store.create_session("q", None);
        let mut rx = store.subscribe(&session.id).unwrap();

        store
            .append_progress_event(&session.id, ProgressUpdate::started(Stage::Planning, "go"))
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        store.remove_session(&session.id);
        assert!(rx.changed().await.is_err());
    }

    #[test]
    fn test_conversation_context_only_returns_completed_turns() {
        let store = MemoryStore::default();
        let conv = Some("conv-1".to_string());
        let done = store.create_session("first", conv.clone());
        let running = store.create_session("second", conv.clone());
        store.create_session("other", Some("conv-2".into()));

        for status in [SessionStatus::Researching, SessionStatus::Synthesizing, SessionStatus::Complete] {
            store
                .transition(&done.id, status, None, ProgressUpdate::completed(Stage::Session, "step"))
                .unwrap();
        }

        let context = store.conversation_context("conv-1", Some(&running.id));
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].id, done.id);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_fails_unfinished_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let store = MemoryStore::default();
        let session = store.create_session("q", Some("conv".into()));
        store
            .append_progress_event(&session.id, ProgressUpdate::started(Stage::Planning, "planning"))
            .unwrap();
        store.save_to_path(&path).await.unwrap();

        let restored = MemoryStore::default();
        assert_eq!(restored.load_from_path(&path).await.unwrap(), 1);

        let back = restored.get_session(&session.id).unwrap();
        assert_eq!(back.status, SessionStatus::Failed);
        assert_eq!(back.failure_reason.as_deref(), Some(INTERRUPTED_REASON));

        let events = restored.list_progress_events(&session.id, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[1].terminal);
        assert_eq!(events[1].seq, 2);
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        assert_eq!(store.load_from_path(dir.path().join("none.json")).await.unwrap(), 0);
    }
}
