//! Spreading activation cache
//!
//! Ephemeral, process-local priming of recently touched memories. Accessing
//! a memory sets it to full activation and primes its direct neighbors in
//! proportion to link strength; levels halve every 30 minutes and entries
//! below a floor are pruned.
//!
//! The cache is a plain struct; the engine wraps it in a `Mutex` and holds
//! the lock only for the duration of one call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::ACTIVATION_HALF_LIFE;
use crate::memory::MemoryLink;

/// Entries below this level are dropped
const PRUNE_FLOOR: f64 = 0.01;

/// Entries untouched for this many half-lives are expired outright
const MAX_HALF_LIVES: f64 = 5.0;

/// Fraction of link strength carried to a neighbor on activation
const SPREAD_FACTOR: f64 = 0.5;

/// Fraction of the current level contributed as a search boost
const BOOST_FACTOR: f64 = 0.20;

/// One activation entry
#[derive(Debug, Clone, Copy)]
struct ActivationEntry {
    level: f64,
    touched_at: DateTime<Utc>,
}

impl ActivationEntry {
    /// Level after exponential decay with a 30-minute half-life.
    /// Entries past [`MAX_HALF_LIVES`] are fully expired.
    fn decayed_level(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.touched_at).num_seconds().max(0) as f64;
        let half_lives = elapsed / ACTIVATION_HALF_LIFE.as_secs() as f64;
        if half_lives >= MAX_HALF_LIVES {
            return 0.0;
        }
        self.level * 0.5_f64.powf(half_lives)
    }
}

/// In-memory activation map: memory id -> (level, timestamp)
#[derive(Debug, Default)]
pub struct ActivationCache {
    entries: HashMap<i64, ActivationEntry>,
}

impl ActivationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a memory at full level and prime its direct neighbors.
    ///
    /// Each neighbor reached through `links` is raised to
    /// `min(1.0, current + strength * 0.5)`. Spread depth is one hop.
    pub fn activate(&mut self, memory_id: i64, links: &[MemoryLink], now: DateTime<Utc>) {
        self.entries.insert(
            memory_id,
            ActivationEntry {
                level: 1.0,
                touched_at: now,
            },
        );

        for link in links {
            let Some(neighbor) = link.other_endpoint(memory_id) else {
                continue;
            };
            let existing = self
                .entries
                .get(&neighbor)
                .map(|e| e.decayed_level(now))
                .unwrap_or(0.0);
            let level = (existing + link.strength * SPREAD_FACTOR).min(1.0);
            self.entries.insert(
                neighbor,
                ActivationEntry {
                    level,
                    touched_at: now,
                },
            );
        }
    }

    /// Search boost contributed by the current activation level.
    ///
    /// Returns `decayed_level * 0.20`; entries that decayed below the floor
    /// are pruned on the spot and contribute nothing.
    pub fn boost(&mut self, memory_id: i64, now: DateTime<Utc>) -> f64 {
        match self.entries.get(&memory_id) {
            Some(entry) => {
                let level = entry.decayed_level(now);
                if level < PRUNE_FLOOR {
                    self.entries.remove(&memory_id);
                    0.0
                } else {
                    level * BOOST_FACTOR
                }
            }
            None => 0.0,
        }
    }

    /// Current decayed level without pruning
    pub fn level(&self, memory_id: i64, now: DateTime<Utc>) -> f64 {
        self.entries
            .get(&memory_id)
            .map(|e| e.decayed_level(now))
            .unwrap_or(0.0)
    }

    /// Drop all entries that decayed below the floor; returns how many
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.decayed_level(now) >= PRUNE_FLOOR);
        before - self.entries.len()
    }

    /// Forget one memory entirely (endpoint deleted)
    pub fn remove(&mut self, memory_id: i64) {
        self.entries.remove(&memory_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
