//! Complete user workflows through the public engine API

use engram_core::{
    Category, ContradictionScan, EngineError, ForgetTarget, MemoryFilter, MemoryInput,
    MemoryType, RecallOptions, Relationship, Scope,
};
use engram_e2e_tests::TestEngine;

#[test]
fn ingest_then_retrieve() {
    let harness = TestEngine::new();

    let memory = harness.remember(
        "Use PostgreSQL for JSON support",
        "We decided to use PostgreSQL because of JSONB.",
        &[],
    );
    assert_eq!(memory.category, Category::Architecture);
    assert!(memory.salience >= 0.60);
    assert_eq!(memory.scope, Scope::Project);
    assert_eq!(memory.project.as_deref(), Some("alpha"));

    harness.remember("Coffee preferences", "the good beans are in the second drawer", &[]);

    let hits = harness
        .engine
        .recall(RecallOptions::query("postgres"))
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].memory.id, memory.id);
    assert!(hits[0].relevance > 0.4);
}

#[test]
fn stale_note_is_deleted_by_consolidation() {
    let harness = TestEngine::new();

    let mut input = MemoryInput::new("scratch thought", "probably nothing");
    input.salience = Some(0.30);
    input.category = Some(Category::Note);
    let note = harness.engine.remember(input).unwrap();
    harness.backdate_access(note.id, 48);

    let report = harness.engine.consolidate(true, false).unwrap();
    assert!(report.deleted >= 1);
    assert!(matches!(
        harness.engine.get_memory(note.id),
        Err(EngineError::NotFound(_))
    ));
    assert!(harness.count_events("memory_deleted") >= 1);

    let stats = harness.engine.get_stats(None).unwrap();
    assert_eq!(stats.total_memories, 0);
    assert_eq!(stats.short_term, 0);
}

#[test]
fn repeated_access_promotes_to_long_term() {
    let harness = TestEngine::new();

    let mut input = MemoryInput::new("promotion candidate", "worth keeping around");
    input.salience = Some(0.70);
    let memory = harness.engine.remember(input).unwrap();

    for _ in 0..3 {
        harness.engine.access_memory(memory.id).unwrap();
    }

    let report = harness.engine.consolidate(true, false).unwrap();
    assert_eq!(report.consolidated, 1);
    assert_eq!(report.deleted, 0);

    let promoted = harness.engine.get_memory(memory.id).unwrap();
    assert_eq!(promoted.memory_type, MemoryType::LongTerm);
}

#[test]
fn tag_overlap_auto_links() {
    let harness = TestEngine::new();

    let first = harness.remember(
        "JWT token setup",
        "the auth service issues signed tokens",
        &["jwt", "auth"],
    );
    let second = harness.remember(
        "JWT middleware",
        "validates tokens on every request",
        &["jwt", "middleware"],
    );

    let related = harness.engine.get_related(second.id).unwrap();
    let (link, neighbor) = related
        .iter()
        .find(|(_, n)| n.id == first.id)
        .expect("auto-link exists");
    assert_eq!(link.relationship, Relationship::Related);
    assert!(link.strength >= 0.30);
}

#[test]
fn conflicting_preferences_are_detected() {
    let harness = TestEngine::new();

    harness.remember("Prefer Redis for cache", "fast and simple to run", &["cache"]);
    harness.remember("Avoid Redis for cache", "kept falling over in staging", &["cache"]);

    let scan = ContradictionScan {
        min_score: 0.4,
        ..Default::default()
    };
    let results = harness.engine.detect_contradictions(scan, true).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].score >= 0.4);
    assert!(results[0].reason.contains("preference"));

    // Linking happened: both sides now show a contradicts edge
    let related = harness.engine.get_related(results[0].source_id).unwrap();
    assert!(related
        .iter()
        .any(|(link, _)| link.relationship == Relationship::Contradicts));
}

#[test]
fn bulk_forget_requires_confirmation() {
    let harness = TestEngine::new();

    for i in 0..10 {
        harness.remember(&format!("scratch {i}"), "temporary working note", &["scratch"]);
    }
    let filter = MemoryFilter {
        tags: vec!["scratch".to_string()],
        ..Default::default()
    };

    let denied = harness
        .engine
        .forget(ForgetTarget::Filter(filter.clone()), false, false);
    assert!(matches!(
        denied,
        Err(EngineError::BulkDeleteSafety { count: 10 })
    ));
    assert_eq!(harness.engine.get_stats(None).unwrap().total_memories, 10);

    let deleted = harness
        .engine
        .forget(ForgetTarget::Filter(filter), false, true)
        .unwrap();
    assert_eq!(deleted.len(), 10);
    assert_eq!(harness.engine.get_stats(None).unwrap().total_memories, 0);
    assert_eq!(harness.count_events("memory_deleted"), 10);
}

#[test]
fn export_clear_import_preserves_content() {
    let harness = TestEngine::new();
    harness.remember("alpha fact", "first body", &["one"]);
    harness.remember("beta fact", "second body", &["two"]);

    let export = harness.engine.export_memories(None).unwrap();
    harness
        .engine
        .forget(ForgetTarget::Filter(MemoryFilter::default()), false, true)
        .unwrap();

    assert_eq!(harness.engine.import_memories(export).unwrap(), 2);

    let after = harness.engine.export_memories(None).unwrap();
    let mut titles: Vec<(String, Category, Vec<String>)> = after
        .memories
        .iter()
        .map(|m| (m.title.clone(), m.category, m.tags.clone()))
        .collect();
    titles.sort();
    assert_eq!(titles.len(), 2);
    assert!(titles.iter().any(|(t, _, tags)| t == "alpha fact"
        && tags.contains(&"one".to_string())));
}

#[tokio::test]
async fn session_brackets_work() {
    let harness = TestEngine::new();

    let session = harness.engine.start_session(None).unwrap();
    harness.remember("during", "created inside the session", &[]);
    let ended = harness
        .engine
        .end_session(&session.id, Some("short but productive"))
        .unwrap();

    assert_eq!(ended.memories_created, 1);
    assert_eq!(ended.summary.as_deref(), Some("short but productive"));
    assert_eq!(harness.count_events("session_started"), 1);
    assert_eq!(harness.count_events("session_ended"), 1);
}
