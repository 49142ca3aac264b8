//! Engine configuration
//!
//! One value object carries every tunable. Tests construct their own;
//! production boots from `EngineConfig::default()` with overrides.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::memory::Category;

/// Database size at which writes start warning (50 MiB)
pub const SIZE_WARNING_BYTES: u64 = 50 * 1024 * 1024;

/// Hard database size cap; writes are rejected above this (100 MiB)
pub const SIZE_BLOCKED_BYTES: u64 = 100 * 1024 * 1024;

/// Half-life of an activation cache entry
pub const ACTIVATION_HALF_LIFE: Duration = Duration::from_secs(30 * 60);

/// Minimum interval between content enrichments of one memory
pub const ENRICHMENT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Light worker cadence: activation pruning, decay tick, trigger check
pub const LIGHT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Medium worker cadence: link discovery and contradiction scan
pub const MEDIUM_TICK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Background full-cleanup cadence (consolidate + merge + vacuum)
pub const FULL_CLEANUP_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Processed event rows older than this are garbage-collected
pub const EVENT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Co-access window for Hebbian link strengthening
pub const COACCESS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Engine configuration knobs.
///
/// Validity: `decay_rate` in (0, 1), `reinforcement_factor` > 1,
/// `salience_threshold` in (0, 1), `consolidation_threshold` above it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Retention per effective hour of decay
    pub decay_rate: f64,
    /// Salience multiplier target on access; the boost applies with
    /// diminishing returns per prior access
    pub reinforcement_factor: f64,
    /// Decayed scores below this drop out of search results
    pub salience_threshold: f64,
    /// Minimum salience for promotion to long-term
    pub consolidation_threshold: f64,
    /// Cap on short-term memories before lowest-priority eviction
    pub max_short_term_memories: usize,
    /// Cap on long-term memories before lowest-priority eviction
    pub max_long_term_memories: usize,
    /// Age in hours after which a high-salience short-term memory is
    /// promoted without repeated access
    pub auto_consolidate_hours: f64,
    /// Database file; `None` resolves the platform default
    pub db_path: Option<PathBuf>,
    /// Expected embedding vector length
    pub embedding_dim: usize,
    /// Content byte limit; longer content is truncated with a marker
    pub max_content_size_bytes: usize,
    /// Per-category decayed-score deletion thresholds; unset categories
    /// use the built-in defaults
    pub category_deletion_thresholds: HashMap<Category, f64>,
    /// Explicit project scope; `None` derives it from the working directory
    pub project: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.95,
            reinforcement_factor: 1.5,
            salience_threshold: 0.2,
            consolidation_threshold: 0.6,
            max_short_term_memories: 200,
            max_long_term_memories: 2000,
            auto_consolidate_hours: 24.0,
            db_path: None,
            embedding_dim: 256,
            max_content_size_bytes: 10 * 1024,
            category_deletion_thresholds: HashMap::new(),
            project: None,
        }
    }
}

impl EngineConfig {
    /// Deletion threshold for a category.
    ///
    /// Architecture and error memories survive the longest; plain notes
    /// are the first to go.
    pub fn deletion_threshold(&self, category: Category) -> f64 {
        if let Some(t) = self.category_deletion_thresholds.get(&category) {
            return *t;
        }
        match category {
            Category::Architecture | Category::Error => 0.05,
            Category::Pattern | Category::Preference => 0.10,
            Category::Learning | Category::Relationship => 0.12,
            Category::Context | Category::Custom => 0.15,
            Category::Todo => 0.20,
            Category::Note => 0.25,
        }
    }
}
