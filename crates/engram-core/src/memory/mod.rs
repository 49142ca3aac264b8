//! Memory module - Core types and data structures
//!
//! Domain entities for the memory engine:
//! - Memory records with lifecycle type, category, scope, and salience
//! - Links forming the knowledge graph
//! - Sessions as episodic markers
//! - Result types for search, stats, and consolidation

mod record;

pub use record::{
    Category, Memory, MemoryInput, MemoryLink, MemoryType, Relationship, Scope, Session,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SEARCH RESULTS
// ============================================================================

/// A ranked search hit with its scoring breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// The matched memory
    pub memory: Memory,
    /// Combined relevance after all boosts
    pub relevance: f64,
    /// Normalized keyword score, when the FTS index matched
    pub fts_score: Option<f64>,
    /// Embedding cosine similarity, when a vector matched
    pub vector_similarity: Option<f64>,
    /// Activation bonus contributed by spreading activation
    pub activation_boost: f64,
}

/// Options for a recall query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecallOptions {
    /// Search text; empty means "browse by filters"
    pub query: String,
    /// Maximum results
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Restrict to one category
    #[serde(default)]
    pub category: Option<Category>,
    /// Restrict to one lifecycle type
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
    /// Project override; defaults to the active project
    #[serde(default)]
    pub project: Option<String>,
    /// Require all of these tags (JSON-array membership, not substring)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Minimum baseline salience
    #[serde(default)]
    pub min_salience: Option<f64>,
    /// Keep results whose decayed score fell below the salience threshold
    #[serde(default)]
    pub include_decayed: bool,
}

fn default_limit() -> usize {
    10
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: 10,
            category: None,
            memory_type: None,
            project: None,
            tags: Vec::new(),
            min_salience: None,
            include_decayed: false,
        }
    }
}

impl RecallOptions {
    /// Plain-text query with default filters
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            query: text.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Aggregate statistics about the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_memories: i64,
    pub short_term: i64,
    pub long_term: i64,
    pub episodic: i64,
    pub total_links: i64,
    pub total_sessions: i64,
    pub average_salience: f64,
    pub memories_with_embeddings: i64,
    pub oldest_memory: Option<DateTime<Utc>>,
    pub newest_memory: Option<DateTime<Utc>>,
    /// Database file size in bytes (main + WAL)
    pub database_bytes: u64,
}

// ============================================================================
// CONSOLIDATION REPORT
// ============================================================================

/// Result of one consolidation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    /// Short-term memories promoted to long-term
    pub consolidated: i64,
    /// Memories whose persisted salience was re-evaluated
    pub decayed: i64,
    /// Memories removed
    pub deleted: i64,
    pub contradictions_found: i64,
    pub contradictions_linked: i64,
    /// Memories whose salience evolved (hub bonus / contradiction penalty)
    pub salience_evolved: i64,
    /// Clusters merged by `merge_similar`
    pub merged: i64,
    pub duration_ms: i64,
}

impl ConsolidationReport {
    /// Whether the pass changed anything at all
    pub fn is_noop(&self) -> bool {
        self.consolidated == 0
            && self.decayed == 0
            && self.deleted == 0
            && self.contradictions_linked == 0
            && self.salience_evolved == 0
            && self.merged == 0
    }
}

// ============================================================================
// EXPORT / IMPORT
// ============================================================================

/// Schema version stamped into exports; imports with another version are
/// rejected.
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// A portable snapshot of memories for export and import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryExport {
    pub schema_version: u32,
    pub project: Option<String>,
    pub exported_at: DateTime<Utc>,
    pub memories: Vec<ExportedMemory>,
}

/// One memory inside an export bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedMemory {
    pub memory_type: MemoryType,
    pub category: Category,
    pub title: String,
    pub content: String,
    pub project: Option<String>,
    pub scope: Scope,
    pub transferable: bool,
    pub tags: Vec<String>,
    pub salience: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl From<&Memory> for ExportedMemory {
    fn from(memory: &Memory) -> Self {
        Self {
            memory_type: memory.memory_type,
            category: memory.category,
            title: memory.title.clone(),
            content: memory.content.clone(),
            project: memory.project.clone(),
            scope: memory.scope,
            transferable: memory.transferable,
            tags: memory.tags.clone(),
            salience: memory.salience,
            created_at: memory.created_at,
            metadata: memory.metadata.clone(),
        }
    }
}
