//! Cross-operation invariants checked through the public API

use engram_core::{
    EngineError, EngineEvent, ForgetTarget, MemoryFilter, MemoryInput, RecallOptions,
    Relationship,
};
use engram_e2e_tests::TestEngine;

#[test]
fn scores_stay_inside_bounds_across_operations() {
    let harness = TestEngine::new();
    let memory = harness.remember("bounded", "salience never escapes its range", &["x"]);

    for _ in 0..30 {
        let updated = harness.engine.access_memory(memory.id).unwrap();
        assert!(updated.salience <= 1.0);
        assert!(updated.decayed_score <= updated.salience + 1e-9);
        assert!(updated.access_count >= 0);
        assert!(updated.last_accessed >= updated.created_at);
    }

    harness.engine.consolidate(true, false).unwrap();
    for exported in harness.engine.export_memories(None).unwrap().memories {
        assert!(exported.salience >= 0.0 && exported.salience <= 1.0);
    }
}

#[test]
fn paused_engine_rejects_writes_and_changes_nothing() {
    let harness = TestEngine::new();
    harness.remember("before", "existing row", &[]);

    harness.engine.pause();
    for attempt in 0..5 {
        let result = harness
            .engine
            .remember(MemoryInput::new(format!("paused {attempt}"), "rejected"));
        assert!(matches!(result, Err(EngineError::Paused)));
    }
    assert_eq!(harness.engine.get_stats(None).unwrap().total_memories, 1);

    harness.engine.resume();
    harness.remember("after", "accepted again", &[]);
    assert_eq!(harness.engine.get_stats(None).unwrap().total_memories, 2);
}

#[test]
fn search_is_operator_safe() {
    let harness = TestEngine::new();
    harness.remember("ops note", "migrate the database carefully", &[]);

    for query in [
        "database-migration",
        "a:b",
        "wild*",
        "caret^",
        "(group)",
        "a & b | c",
        "file.ext",
        "AND OR NOT",
        "v1.2.3",
        "\"quoted phrase\"",
    ] {
        harness
            .engine
            .recall(RecallOptions::query(query))
            .unwrap_or_else(|e| panic!("query {query:?} failed: {e}"));
    }
}

#[test]
fn deleting_a_memory_cascades_links() {
    let harness = TestEngine::new();
    let a = harness.remember("left", "one side", &["pair"]);
    let b = harness.remember("right", "other side", &["pair"]);

    harness
        .engine
        .link_memories(a.id, b.id, Relationship::Extends, 0.8)
        .unwrap();

    harness
        .engine
        .forget(ForgetTarget::Id(a.id), false, false)
        .unwrap();
    assert!(harness.engine.get_related(b.id).unwrap().is_empty());
}

#[test]
fn forgetting_one_memory_needs_no_confirm() {
    let harness = TestEngine::new();
    let memory = harness.remember("solo", "only one", &[]);
    let deleted = harness
        .engine
        .forget(ForgetTarget::Id(memory.id), false, false)
        .unwrap();
    assert_eq!(deleted.len(), 1);
}

#[test]
fn filtered_recall_respects_tags_exactly() {
    let harness = TestEngine::new();
    harness.remember("tagged auth", "about logins", &["auth"]);
    harness.remember("tagged author", "about books", &["author"]);

    let options = RecallOptions {
        tags: vec!["auth".to_string()],
        ..Default::default()
    };
    let hits = harness.engine.recall(options).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.title, "tagged auth");
}

#[tokio::test]
async fn live_stream_sees_lifecycle_events() {
    let harness = TestEngine::new();
    let mut rx = harness.engine.subscribe();

    let memory = harness.remember("observed", "emits a created event", &[]);
    let event = rx.recv().await.unwrap();
    match event {
        EngineEvent::MemoryCreated { id, title, .. } => {
            assert_eq!(id, memory.id);
            assert_eq!(title, "observed");
        }
        other => panic!("expected memory_created, got {}", other.kind()),
    }

    harness
        .engine
        .forget(ForgetTarget::Id(memory.id), false, false)
        .unwrap();
    // Skip any intermediate events until the deletion arrives
    loop {
        match rx.recv().await.unwrap() {
            EngineEvent::MemoryDeleted { id, .. } => {
                assert_eq!(id, memory.id);
                break;
            }
            _ => continue,
        }
    }
}

#[test]
fn durable_queue_is_at_least_once() {
    let harness = TestEngine::new();
    harness.remember("queued", "lands in the durable queue", &[]);

    let pending = harness.engine.unprocessed_events(100).unwrap();
    assert!(pending.iter().any(|e| e.event_type == "memory_created"));

    let ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
    harness.engine.mark_events_processed(&ids).unwrap();
    assert!(harness.engine.unprocessed_events(100).unwrap().is_empty());
}

#[test]
fn dry_run_consolidation_never_mutates() {
    let harness = TestEngine::new();
    harness.remember("anchor", "still standing", &[]);

    let before = harness.engine.get_stats(None).unwrap().total_memories;
    harness.engine.consolidate(true, true).unwrap();
    assert_eq!(
        harness.engine.get_stats(None).unwrap().total_memories,
        before
    );
}

#[test]
fn global_memories_cross_projects() {
    let harness = TestEngine::new();
    // Generalizing language auto-promotes to global scope
    harness.remember(
        "Always pin dependency versions",
        "a general rule for every repository",
        &[],
    );

    harness.engine.set_project("unrelated-project");
    let hits = harness
        .engine
        .recall(RecallOptions::query("pin dependency versions"))
        .unwrap();
    assert_eq!(hits.len(), 1);

    let filter = MemoryFilter {
        project: Some("unrelated-project".to_string()),
        ..Default::default()
    };
    let visible = harness
        .engine
        .forget(ForgetTarget::Filter(filter), true, false)
        .unwrap();
    assert_eq!(visible.len(), 1);
}
