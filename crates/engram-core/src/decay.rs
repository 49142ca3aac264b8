//! Temporal decay model
//!
//! Pure functions mapping (memory, now, config) to decayed scores,
//! reinforcement boosts, and promotion/deletion decisions. No I/O here;
//! the consolidator and the worker apply the results.

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::memory::{Memory, MemoryType};

/// Long-term memories decay 24x slower than short-term
const LONG_TERM_SLOWDOWN: f64 = 24.0;

/// Episodic memories decay 6x slower than short-term
const EPISODIC_SLOWDOWN: f64 = 6.0;

/// Each access slows decay by 2%, up to 30%
const ACCESS_SLOWDOWN_PER_HIT: f64 = 0.02;
const ACCESS_SLOWDOWN_CAP: f64 = 0.30;

/// Reinforcement boost shrinks by 10% per prior access
const REINFORCEMENT_DIMINISH: f64 = 0.9;
const REINFORCEMENT_CAP: f64 = 0.50;

/// Compute the current decayed score of a memory.
///
/// Hours since access are normalized by lifecycle type, slowed by access
/// history, then fed through exponential decay. The result never exceeds
/// the baseline salience: decay cannot inflate.
pub fn decayed_score(memory: &Memory, now: DateTime<Utc>, config: &EngineConfig) -> f64 {
    let hours = memory.hours_since_access(now);

    let normalized = match memory.memory_type {
        MemoryType::ShortTerm => hours,
        MemoryType::LongTerm => hours / LONG_TERM_SLOWDOWN,
        MemoryType::Episodic => hours / EPISODIC_SLOWDOWN,
    };

    let slowdown = 1.0 + (memory.access_count as f64 * ACCESS_SLOWDOWN_PER_HIT).min(ACCESS_SLOWDOWN_CAP);
    let effective_hours = normalized / slowdown;

    (memory.salience * config.decay_rate.powf(effective_hours)).clamp(0.0, memory.salience)
}

/// Salience boost applied when a memory is accessed.
///
/// Diminishing returns: the more often a memory has been accessed, the
/// smaller each further boost, capped at +0.50.
pub fn reinforcement_boost(memory: &Memory, config: &EngineConfig) -> f64 {
    let base = (config.reinforcement_factor - 1.0)
        * REINFORCEMENT_DIMINISH.powi(memory.access_count.min(i32::MAX as i64) as i32);
    base.min(REINFORCEMENT_CAP)
}

/// New salience after one access
pub fn reinforced_salience(memory: &Memory, config: &EngineConfig) -> f64 {
    (memory.salience + reinforcement_boost(memory, config)).min(1.0)
}

/// Should a short-term memory graduate to long-term?
pub fn should_promote_to_long_term(
    memory: &Memory,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> bool {
    memory.memory_type == MemoryType::ShortTerm
        && memory.salience >= config.consolidation_threshold
        && (memory.access_count >= 3
            || (memory.age_hours(now) >= config.auto_consolidate_hours && memory.salience >= 0.7))
}

/// Should an episodic memory be retained as long-term knowledge?
pub fn should_promote_episodic(memory: &Memory, now: DateTime<Utc>) -> bool {
    memory.access_count >= 5 || (memory.age_hours(now) >= 24.0 && memory.salience >= 0.8)
}

/// Should this memory be deleted?
///
/// Long-term memories are protected: only near-zero decayed scores with
/// almost no access history qualify. Everything else goes through the
/// per-category threshold.
pub fn should_delete(memory: &Memory, decayed: f64, config: &EngineConfig) -> bool {
    if memory.memory_type == MemoryType::LongTerm {
        return decayed < 0.10 && memory.access_count < 2;
    }
    decayed < config.deletion_threshold(memory.category)
}

/// Composite priority used for eviction ordering and search:
/// decayed score, recency, and access frequency.
pub fn priority(memory: &Memory, decayed: f64, now: DateTime<Utc>) -> f64 {
    let recency = (-memory.hours_since_access(now) / 24.0).exp();
    let frequency = (memory.access_count as f64 / 10.0).min(1.0);
    0.4 * decayed + 0.3 * recency + 0.3 * frequency
}

/// Classification of one memory during a consolidation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayOutcome {
    /// Promote short-term to long-term
    Promote,
    /// Remove the memory
    Delete,
    /// Keep it, persisting the freshly computed decayed score
    Update,
}

/// Classify a short-term memory for consolidation.
///
/// Promotion wins over deletion: an actively used memory is never removed
/// in the same pass that would have promoted it.
pub fn classify(memory: &Memory, now: DateTime<Utc>, config: &EngineConfig) -> (DecayOutcome, f64) {
    let decayed = decayed_score(memory, now, config);
    if should_promote_to_long_term(memory, now, config) {
        (DecayOutcome::Promote, decayed)
    } else if should_delete(memory, decayed, config) {
        (DecayOutcome::Delete, decayed)
    } else {
        (DecayOutcome::Update, decayed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
