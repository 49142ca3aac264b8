//! # Engram Core
//!
//! Brain-inspired memory engine for long-running assistant sessions:
//!
//! - **Salience scoring**: importance, category, and tags assessed at
//!   ingestion from keyword families
//! - **Temporal decay**: scores fade with time, slowed by access history;
//!   reinforcement on access with diminishing returns
//! - **Consolidation**: short-term memories are promoted, merged, or
//!   deleted by a periodic atomic pass
//! - **Knowledge graph**: auto-detected links with Hebbian co-access
//!   strengthening and spreading activation
//! - **Contradiction detection**: weighted pattern pairs over
//!   topic-related memories
//! - **Hybrid search**: FTS5 keyword rank + embedding cosine + decayed
//!   salience + graph and activation boosts in one pipeline
//! - **Typed events**: in-process broadcast plus a durable cross-process
//!   queue with at-least-once delivery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use engram_core::{EngineConfig, MemoryEngine, MemoryInput, RecallOptions};
//!
//! # fn main() -> engram_core::Result<()> {
//! let engine = MemoryEngine::open(EngineConfig::default())?;
//!
//! let memory = engine.remember(MemoryInput::new(
//!     "Use PostgreSQL for JSON support",
//!     "We decided to use PostgreSQL because of JSONB.",
//! ))?;
//!
//! let hits = engine.recall(RecallOptions::query("postgres"))?;
//! assert_eq!(hits[0].memory.id, memory.id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): compile SQLite from source
//! - `embeddings`: local embedding generation with fastembed; without it
//!   the engine degrades to keyword + graph + activation ranking

// ============================================================================
// MODULES
// ============================================================================

pub mod activation;
pub mod config;
pub mod consolidation;
pub mod contradiction;
pub mod decay;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod events;
pub mod links;
pub mod memory;
pub mod project;
pub mod salience;
pub mod search;
pub mod storage;
pub mod worker;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Engine facade
pub use engine::{ForgetTarget, MemoryEngine};
pub use error::{EngineError, Result};

// Configuration
pub use config::EngineConfig;

// Domain types
pub use memory::{
    Category, ConsolidationReport, ExportedMemory, Memory, MemoryExport, MemoryInput, MemoryLink,
    MemoryStats, MemoryType, RecallOptions, Relationship, Scope, SearchHit, Session,
    EXPORT_SCHEMA_VERSION,
};

// Scoring
pub use decay::{
    decayed_score, priority, reinforced_salience, should_delete, should_promote_episodic,
    should_promote_to_long_term,
};
pub use salience::{assess, SalienceAssessment};

// Graph
pub use contradiction::{Contradiction, ContradictionScan};
pub use links::LinkCandidate;

// Events
pub use events::{DecayChange, EngineEvent, EventBus, StoredEvent};

// Storage surface shared with adapters
pub use storage::{
    default_db_path, MemoryFilter, MemoryOrder, MemoryStore, SizeInfo, StorageError,
};

// Embeddings
pub use embeddings::{cosine_similarity, Embedding, EmbeddingBackend, EmbeddingService};

// Control surface
pub use project::{ControlStatus, GLOBAL_PROJECT};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Category, ConsolidationReport, EngineConfig, EngineError, EngineEvent, ForgetTarget,
        Memory, MemoryEngine, MemoryInput, MemoryStats, MemoryType, RecallOptions, Relationship,
        Result, Scope, SearchHit,
    };
}
