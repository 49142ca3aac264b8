//! Contradiction detector
//!
//! Pairwise scan over topic-related memories using a closed list of
//! weighted pattern pairs. A pair fires when one text matches the first
//! pattern and the other matches the second; "different choice" patterns
//! additionally require the captured fragments to actually differ.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::links::{jaccard_similarity, tokenize};
use crate::memory::{Memory, Relationship};
use crate::storage::{MemoryFilter, MemoryOrder, MemoryStore, Result};

/// Topic similarity below this aborts the pair check
const TOPIC_FLOOR: f64 = 0.20;

/// Contradiction scores below this are never reported
const SCORE_FLOOR: f64 = 0.30;

/// Default acceptance threshold
pub const DEFAULT_MIN_SCORE: f64 = 0.40;

/// Candidate set bound for the pairwise scan
const CANDIDATE_LIMIT: usize = 200;

/// Captured fragments this similar are the same statement, not a conflict
const DIVERGENCE_IDENTITY: f64 = 0.80;

// ============================================================================
// PATTERN PAIRS
// ============================================================================

enum PairKind {
    /// One text matches `first`, the other matches `second` (and not
    /// `first` - "don't use X" itself contains "use")
    Opposition { first: Regex, second: Regex },
    /// Both texts match the pattern with diverging captures
    Divergence { pattern: Regex },
}

struct PatternPair {
    kind: PairKind,
    weight: f64,
    reason: &'static str,
}

fn opposition(first: &str, second: &str, weight: f64, reason: &'static str) -> PatternPair {
    PatternPair {
        kind: PairKind::Opposition {
            first: Regex::new(first).expect("static pattern compiles"),
            second: Regex::new(second).expect("static pattern compiles"),
        },
        weight,
        reason,
    }
}

static PATTERN_PAIRS: LazyLock<Vec<PatternPair>> = LazyLock::new(|| {
    vec![
        opposition(
            r"(?i)\b(?:don'?t|do not|never|stop)\s+us(?:e|ing)\b",
            r"(?i)\buse\b",
            0.8,
            "negated usage",
        ),
        opposition(
            r"(?i)\bprefer(?:red|s)?\b",
            r"(?i)\bavoid(?:ing|ed)?\b",
            0.7,
            "conflicting preference",
        ),
        opposition(
            r"(?i)\bshould\s+not\b|\bshouldn'?t\b",
            r"(?i)\bshould\b",
            0.6,
            "guidance conflict",
        ),
        opposition(
            r"(?i)\balways\b",
            r"(?i)\bnever\b",
            0.6,
            "absolute rule conflict",
        ),
        opposition(
            r"(?i)\bdeprecat(?:ed|es|ing)\b",
            r"(?i)\b(?:added|introduc(?:ed|es|ing)|now\s+supports?)\b",
            0.5,
            "lifecycle conflict",
        ),
        opposition(
            r"(?i)\bdisabl(?:e|ed|ing)\b",
            r"(?i)\benabl(?:e|ed|ing)\b",
            0.5,
            "configuration conflict",
        ),
        PatternPair {
            kind: PairKind::Divergence {
                pattern: Regex::new(r"(?i)\bus(?:e|es|ed|ing)\s+([\w.-]+)\s+(?:for|as)\b")
                    .expect("static pattern compiles"),
            },
            weight: 0.5,
            reason: "different choices",
        },
    ]
});

// ============================================================================
// RESULTS
// ============================================================================

/// One detected contradiction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contradiction {
    pub source_id: i64,
    pub target_id: i64,
    /// Pattern weight scaled by topic similarity
    pub score: f64,
    /// Which pattern fired
    pub reason: String,
}

/// Options for a contradiction scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContradictionScan {
    /// Restrict to one project; `None` scans everything visible
    pub project: Option<String>,
    /// Acceptance threshold (never below the built-in floor)
    pub min_score: f64,
    /// Maximum results after sorting by score
    pub limit: usize,
}

impl Default for ContradictionScan {
    fn default() -> Self {
        Self {
            project: None,
            min_score: DEFAULT_MIN_SCORE,
            limit: 50,
        }
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

/// Pairwise contradiction detection over the store
pub struct ContradictionDetector {
    store: Arc<MemoryStore>,
}

impl ContradictionDetector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Check one pair. `None` when the ids match, the memories share no
    /// topic, or no pattern pair fires above the threshold.
    pub fn check(&self, a: &Memory, b: &Memory, min_score: f64) -> Option<Contradiction> {
        check_pair(a, b, min_score)
    }

    /// Pairwise scan over the strongest recent memories.
    ///
    /// The candidate set is bounded to the top 200 by salience x recency,
    /// so this stays O(200 squared) no matter how big the store grows.
    pub fn detect_all(&self, scan: &ContradictionScan) -> Result<Vec<Contradiction>> {
        let filter = MemoryFilter {
            project: scan.project.clone(),
            ..Default::default()
        };
        let mut pool = self
            .store
            .bulk_select(&filter, MemoryOrder::Recency, CANDIDATE_LIMIT * 5, 0)?;

        let now = Utc::now();
        pool.sort_by(|a, b| {
            let score_a = a.salience * (-a.hours_since_access(now) / 24.0).exp();
            let score_b = b.salience * (-b.hours_since_access(now) / 24.0).exp();
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        pool.truncate(CANDIDATE_LIMIT);

        let min_score = scan.min_score.max(SCORE_FLOOR);
        let mut results = Vec::new();
        for i in 0..pool.len() {
            for j in (i + 1)..pool.len() {
                if let Some(hit) = self.check(&pool[i], &pool[j], min_score) {
                    results.push(hit);
                }
            }
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(scan.limit);
        Ok(results)
    }

    /// Create `contradicts` links for detected pairs; returns how many
    /// new edges were created.
    pub fn link_all(&self, results: &[Contradiction]) -> Result<usize> {
        let mut created = 0;
        for hit in results {
            if self
                .store
                .link_between(hit.source_id, hit.target_id)?
                .is_some()
            {
                continue;
            }
            if self
                .store
                .create_link(
                    hit.source_id,
                    hit.target_id,
                    Relationship::Contradicts,
                    hit.score,
                )?
                .is_some()
            {
                created += 1;
            }
        }
        Ok(created)
    }
}

// ============================================================================
// SCORING HELPERS
// ============================================================================

/// Pure pairwise check, usable inside a consolidation transaction
pub fn check_pair(a: &Memory, b: &Memory, min_score: f64) -> Option<Contradiction> {
    if a.id == b.id {
        return None;
    }

    let topic = topic_similarity(a, b);
    if topic < TOPIC_FLOOR {
        return None;
    }

    let text_a = format!("{} {}", a.title, a.content);
    let text_b = format!("{} {}", b.title, b.content);

    let mut best: Option<(&'static str, f64)> = None;
    for pair in PATTERN_PAIRS.iter() {
        if !pair_fires(&pair.kind, &text_a, &text_b) {
            continue;
        }
        match best {
            Some((_, weight)) if weight >= pair.weight => {}
            _ => best = Some((pair.reason, pair.weight)),
        }
    }

    let (reason, weight) = best?;
    let score = weight * topic;
    if score < SCORE_FLOOR || score < min_score {
        return None;
    }

    Some(Contradiction {
        source_id: a.id,
        target_id: b.id,
        score,
        reason: reason.to_string(),
    })
}

/// Shared project, category, tags, and title words, capped at 1.0
fn topic_similarity(a: &Memory, b: &Memory) -> f64 {
    let mut similarity = 0.0;
    if a.project == b.project {
        similarity += 0.3;
    }
    if a.category == b.category {
        similarity += 0.2;
    }

    let tags_a: std::collections::HashSet<String> =
        a.tags.iter().map(|t| t.to_lowercase()).collect();
    let tags_b: std::collections::HashSet<String> =
        b.tags.iter().map(|t| t.to_lowercase()).collect();
    if !tags_a.is_empty() || !tags_b.is_empty() {
        similarity += 0.3 * jaccard_similarity(&tags_a, &tags_b);
    }

    similarity += 0.2 * jaccard_similarity(&tokenize(&a.title), &tokenize(&b.title));
    similarity.min(1.0)
}

fn pair_fires(kind: &PairKind, text_a: &str, text_b: &str) -> bool {
    match kind {
        PairKind::Opposition { first, second } => {
            let second_only = |t: &str| second.is_match(t) && !first.is_match(t);
            (first.is_match(text_a) && second_only(text_b))
                || (first.is_match(text_b) && second_only(text_a))
        }
        PairKind::Divergence { pattern } => {
            let (Some(cap_a), Some(cap_b)) = (pattern.captures(text_a), pattern.captures(text_b))
            else {
                return false;
            };
            let frag_a = tokenize(cap_a.get(1).map(|m| m.as_str()).unwrap_or(""));
            let frag_b = tokenize(cap_b.get(1).map(|m| m.as_str()).unwrap_or(""));
            // Same captured choice is agreement, not contradiction
            jaccard_similarity(&frag_a, &frag_b) <= DIVERGENCE_IDENTITY
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Category, MemoryType, Scope};
    use crate::storage::NewMemory;
    use tempfile::TempDir;

    fn setup() -> (ContradictionDetector, Arc<MemoryStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            MemoryStore::open(Some(dir.path().join("contra.db")), 10 * 1024).unwrap(),
        );
        (ContradictionDetector::new(store.clone()), store, dir)
    }

    fn seed(store: &MemoryStore, title: &str, content: &str, tags: &[&str]) -> Memory {
        store
            .insert(NewMemory {
                memory_type: MemoryType::ShortTerm,
                category: Category::Note,
                title: title.to_string(),
                content: content.to_string(),
                project: Some("alpha".to_string()),
                scope: Scope::Project,
                transferable: false,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                salience: 0.7,
                metadata: Default::default(),
            })
            .unwrap()
    }

    #[test]
    fn test_preference_conflict_detected() {
        let (detector, store, _dir) = setup();
        let a = seed(&store, "Prefer Redis for cache", "redis is the cache", &["cache"]);
        let b = seed(&store, "Avoid Redis for cache", "too flaky under load", &["cache"]);

        let hit = detector.check(&a, &b, DEFAULT_MIN_SCORE).unwrap();
        assert!(hit.score >= 0.4);
        assert!(hit.reason.contains("preference"));
    }

    #[test]
    fn test_symmetric_detection() {
        let (detector, store, _dir) = setup();
        let a = seed(&store, "Prefer Redis for cache", "redis is the cache", &["cache"]);
        let b = seed(&store, "Avoid Redis for cache", "too flaky", &["cache"]);

        let forward = detector.check(&a, &b, DEFAULT_MIN_SCORE).unwrap();
        let backward = detector.check(&b, &a, DEFAULT_MIN_SCORE).unwrap();
        assert!((forward.score - backward.score).abs() < 1e-9);
    }

    #[test]
    fn test_unrelated_topics_abort() {
        let (detector, store, _dir) = setup();
        let mut a = seed(&store, "Prefer tabs", "prefer tabs in this repo", &["style"]);
        let b = seed(&store, "Avoid caffeine", "late coffee is a mistake", &["health"]);
        // Force every topic signal apart
        a.project = Some("beta".to_string());
        a.category = Category::Preference;

        assert!(detector.check(&a, &b, DEFAULT_MIN_SCORE).is_none());
    }

    #[test]
    fn test_negated_use_fires_against_use() {
        let (detector, store, _dir) = setup();
        let a = seed(&store, "ORM guidance", "don't use the ORM for bulk writes", &["orm"]);
        let b = seed(&store, "ORM guidance", "use the ORM for bulk writes", &["orm"]);

        let hit = detector.check(&a, &b, DEFAULT_MIN_SCORE).unwrap();
        assert_eq!(hit.reason, "negated usage");
    }

    #[test]
    fn test_two_negated_uses_do_not_fire() {
        let (detector, store, _dir) = setup();
        let a = seed(&store, "ORM rule", "don't use the ORM for bulk writes", &["orm"]);
        let b = seed(&store, "ORM rule", "never use the ORM for bulk writes", &["orm"]);

        // Both say the same thing; negated-usage must not fire, and no
        // other opposition applies
        assert!(detector.check(&a, &b, 0.30).is_none());
    }

    #[test]
    fn test_divergent_choices_fire() {
        let (detector, store, _dir) = setup();
        let a = seed(&store, "Queue choice", "we use kafka for messaging", &["queue"]);
        let b = seed(&store, "Queue choice", "we use rabbitmq for messaging", &["queue"]);

        let hit = detector.check(&a, &b, 0.30).unwrap();
        assert_eq!(hit.reason, "different choices");
    }

    #[test]
    fn test_same_choice_does_not_fire() {
        let (detector, store, _dir) = setup();
        let a = seed(&store, "Queue choice", "we use kafka for messaging", &["queue"]);
        let b = seed(&store, "Queue pick", "we use kafka for messaging too", &["queue"]);

        assert!(detector.check(&a, &b, 0.30).is_none());
    }

    #[test]
    fn test_detect_all_finds_single_pair() {
        let (detector, store, _dir) = setup();
        seed(&store, "Prefer Redis for cache", "redis", &["cache"]);
        seed(&store, "Avoid Redis for cache", "flaky", &["cache"]);
        seed(&store, "Standup notes", "talked about the sprint", &[]);

        let results = detector.detect_all(&ContradictionScan::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score >= 0.4);
    }

    #[test]
    fn test_link_all_creates_contradicts_edges() {
        let (detector, store, _dir) = setup();
        seed(&store, "Prefer Redis for cache", "redis", &["cache"]);
        seed(&store, "Avoid Redis for cache", "flaky", &["cache"]);

        let results = detector.detect_all(&ContradictionScan::default()).unwrap();
        let created = detector.link_all(&results).unwrap();
        assert_eq!(created, 1);

        let links = store.links_by_relationship(Relationship::Contradicts).unwrap();
        assert_eq!(links.len(), 1);
        assert!((links[0].strength - results[0].score).abs() < 1e-9);

        // Linking again is a no-op
        assert_eq!(detector.link_all(&results).unwrap(), 0);
    }

    #[test]
    fn test_min_score_respected() {
        let (detector, store, _dir) = setup();
        seed(&store, "Prefer Redis for cache", "redis", &["cache"]);
        seed(&store, "Avoid Redis for cache", "flaky", &["cache"]);

        let strict = ContradictionScan {
            min_score: 0.95,
            ..Default::default()
        };
        assert!(detector.detect_all(&strict).unwrap().is_empty());
    }
}
