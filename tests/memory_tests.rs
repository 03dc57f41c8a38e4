//! Conversation memory persisted across coordinator instances via snapshots.

mod common;

use common::mocks::{Reply, Role, ScriptedLLM, StaticRetriever, coordinator_with_memory, doc, test_config};
use futures::StreamExt;
use quarry::memory::MemoryStore;
use quarry::memory::store::INTERRUPTED_REASON;
use quarry::types::{SessionStatus, Stage};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn scripted() -> ScriptedLLM {
    ScriptedLLM::new()
        .always(
            Role::Planner,
            Reply::json(json!({"tasks": ["Office vacancy trends"]})),
        )
        .always(
            Role::Analyzer,
            Reply::json(json!({
                "summary": "Vacancy is up.",
                "key_insights": [{"insight": "Vacancy rose", "sources": ["S1"], "confidence": "medium"}]
            })),
        )
        .always(
            Role::Report,
            Reply::json(json!({
                "summary": "Downtown vacancy rose.",
                "sections": [{"heading": "Office vacancy trends", "body": "Up.", "citations": ["S1"], "task": 1}]
            })),
        )
}

fn retriever() -> Arc<StaticRetriever> {
    Arc::new(StaticRetriever::new().with_default(vec![doc(
        "https://example.com/vacancy",
        "Office Vacancy Survey",
    )]))
}

#[tokio::test]
async fn test_conversation_survives_snapshot_round_trip() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("memory.json");
    let config = test_config();

    let first_memory = Arc::new(MemoryStore::new(&config.memory));
    let first = coordinator_with_memory(
        Arc::clone(&first_memory),
        Arc::new(scripted()),
        retriever(),
        None,
        &config,
    );
    first
        .research("Remote work and downtown offices", Some("conv".into()))
        .await
        .expect("first turn");
    first_memory.save_to_path(&path).await.expect("save");

    let second_memory = Arc::new(MemoryStore::new(&config.memory));
    assert_eq!(second_memory.load_from_path(&path).await.expect("load"), 1);

    let llm = Arc::new(scripted());
    let second = coordinator_with_memory(second_memory, llm.clone(), retriever(), None, &config);
    let session_id = second
        .submit("What about suburban offices?", Some("conv".into()))
        .expect("valid query");
    second.run(&session_id).await.expect("follow-up");

    let prompt = llm.prompts(Role::Planner).pop().expect("planner prompt");
    assert!(prompt.contains("Earlier turns of this conversation"));
    assert!(prompt.contains("Remote work and downtown offices"));

    let events: Vec<_> = second.events(&session_id, 0).collect().await;
    assert!(events.iter().any(|e| e.stage == Stage::Memory));
}

#[tokio::test]
async fn test_unfinished_session_is_restored_as_failed() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("memory.json");
    let config = test_config();

    let memory = Arc::new(MemoryStore::new(&config.memory));
    let coordinator = coordinator_with_memory(
        Arc::clone(&memory),
        Arc::new(scripted()),
        retriever(),
        None,
        &config,
    );
    let session_id = coordinator.submit("Never run", None).expect("valid query");
    memory.save_to_path(&path).await.expect("save");

    let restored = Arc::new(MemoryStore::new(&config.memory));
    restored.load_from_path(&path).await.expect("load");
    let session = restored.get_session(&session_id).expect("restored session");
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failure_reason.as_deref(), Some(INTERRUPTED_REASON));
    assert!(restored.is_log_closed(&session_id).expect("log"));

    // interrupted turns never feed later planning
    assert!(restored.conversation_context("conv", None).is_empty());
}
