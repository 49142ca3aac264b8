//! Test harness for end-to-end engine journeys
//!
//! Provides isolated engine instances backed by temporary databases,
//! with helpers for seeding and backdating memories.

use std::path::PathBuf;
use std::sync::Arc;

use engram_core::embeddings::{EmbeddingBackend, EmbeddingError};
use engram_core::storage::{FieldPatch, MemoryStore};
use engram_core::{EngineConfig, EmbeddingService, Memory, MemoryEngine, MemoryInput};
use tempfile::TempDir;

/// Deterministic token-hashing embedding backend: similar texts share
/// buckets, disjoint texts do not, and no model download is involved.
pub struct HashingBackend {
    pub dim: usize,
}

impl EmbeddingBackend for HashingBackend {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0_f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash = 0_usize;
            for byte in token.bytes() {
                hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
            }
            vector[hash % self.dim] += 1.0;
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "test-hashing"
    }
}

/// An isolated engine on a temporary database.
///
/// The temp directory lives as long as the harness; dropping it removes
/// the database.
pub struct TestEngine {
    pub engine: MemoryEngine,
    db_path: PathBuf,
    _dir: TempDir,
}

impl TestEngine {
    /// Engine scoped to the "alpha" project with a test embedder
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Engine with config tweaks applied on top of the test defaults
    pub fn with_config(tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("e2e.db");
        let mut config = EngineConfig {
            db_path: Some(db_path.clone()),
            project: Some("alpha".to_string()),
            embedding_dim: 16,
            ..Default::default()
        };
        tweak(&mut config);

        let embedder = Arc::new(EmbeddingService::with_backend(
            Box::new(HashingBackend { dim: 16 }),
            16,
        ));
        let engine =
            MemoryEngine::open_with_embedder(config, embedder).expect("engine opens");
        Self {
            engine,
            db_path,
            _dir: dir,
        }
    }

    /// Ingest with optional tags
    pub fn remember(&self, title: &str, content: &str, tags: &[&str]) -> Memory {
        self.engine
            .remember(MemoryInput::new(title, content).with_tags(tags))
            .expect("remember succeeds")
    }

    /// Move a memory's `last_accessed` into the past through a second
    /// connection to the same database.
    pub fn backdate_access(&self, id: i64, hours: i64) {
        let store =
            MemoryStore::open(Some(self.db_path.clone()), 10 * 1024).expect("store opens");
        let patch = FieldPatch {
            last_accessed: Some(chrono::Utc::now() - chrono::Duration::hours(hours)),
            ..Default::default()
        };
        store.update_fields(id, &patch).expect("backdate succeeds");
    }

    /// Count durable events of one type
    pub fn count_events(&self, kind: &str) -> usize {
        self.engine
            .unprocessed_events(10_000)
            .expect("queue readable")
            .into_iter()
            .filter(|e| e.event_type == kind)
            .count()
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
