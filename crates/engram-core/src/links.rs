//! Link engine
//!
//! Detects, creates, and strengthens edges in the memory graph:
//! - Tag overlap, embedding cosine, and an FTS + Jaccard fallback for
//!   auto-detection on ingest and during worker scans
//! - Hebbian strengthening for memories accessed close together in time
//!
//! Detection is best-effort everywhere; a failure never breaks the
//! operation that triggered it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::COACCESS_WINDOW;
use crate::embeddings::cosine_similarity;
use crate::memory::{Memory, MemoryLink, Relationship};
use crate::storage::{MemoryFilter, MemoryOrder, MemoryStore, Result};

/// Most candidates returned by one detection pass
const MAX_CANDIDATES: usize = 5;

/// Candidates scanned by the embedding strategy
const EMBEDDING_SCAN_LIMIT: usize = 100;

/// Minimum cosine accepted by the embedding strategy
const EMBEDDING_FLOOR: f64 = 0.60;

/// Minimum Jaccard accepted by the FTS fallback
const JACCARD_FLOOR: f64 = 0.30;

/// Strength increment for co-accessed pairs
const HEBBIAN_INCREMENT: f64 = 0.05;

/// Strength of a freshly created co-access link
const HEBBIAN_INITIAL: f64 = 0.20;

// ============================================================================
// TEXT SIMILARITY
// ============================================================================

/// Lowercased word set: punctuation stripped, tokens of more than two
/// characters kept.
pub(crate) fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(|token| token.to_string())
        .collect()
}

/// Jaccard similarity of two sets; two empty sets are identical
pub(crate) fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

// ============================================================================
// LINK ENGINE
// ============================================================================

/// A proposed edge discovered by relationship detection
#[derive(Debug, Clone)]
pub struct LinkCandidate {
    pub target_id: i64,
    pub relationship: Relationship,
    pub strength: f64,
}

/// Detects and maintains graph edges
pub struct LinkEngine {
    store: Arc<MemoryStore>,
}

impl LinkEngine {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Detect up to five related memories, deduplicated by target.
    ///
    /// Strategies run in priority order: shared tags, then embedding
    /// cosine (when the source has a vector), then an FTS + Jaccard
    /// fallback (when it does not).
    pub fn detect_relationships(&self, memory: &Memory) -> Result<Vec<LinkCandidate>> {
        let filter = MemoryFilter {
            project: memory.project.clone(),
            ..Default::default()
        };

        let mut candidates: Vec<LinkCandidate> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        seen.insert(memory.id);

        self.detect_by_tags(memory, &filter, &mut candidates, &mut seen)?;

        if candidates.len() < MAX_CANDIDATES {
            if let Some(embedding) = self.store.get_embedding(memory.id)? {
                self.detect_by_embedding(
                    &embedding.vector,
                    &filter,
                    &mut candidates,
                    &mut seen,
                )?;
            } else {
                self.detect_by_text(memory, &filter, &mut candidates, &mut seen)?;
            }
        }

        candidates.truncate(MAX_CANDIDATES);
        Ok(candidates)
    }

    /// Shared-tag strategy: strength grows with the overlap size
    fn detect_by_tags(
        &self,
        memory: &Memory,
        filter: &MemoryFilter,
        candidates: &mut Vec<LinkCandidate>,
        seen: &mut HashSet<i64>,
    ) -> Result<()> {
        if memory.tags.is_empty() {
            return Ok(());
        }

        let own_tags: HashSet<&str> = memory.tags.iter().map(|t| t.as_str()).collect();
        let mut shared_counts: HashMap<i64, usize> = HashMap::new();

        for tag in &memory.tags {
            let tag_filter = MemoryFilter {
                tags: vec![tag.clone()],
                ..filter.clone()
            };
            for other in self
                .store
                .bulk_select(&tag_filter, MemoryOrder::Salience, 50, 0)?
            {
                if seen.contains(&other.id) || shared_counts.contains_key(&other.id) {
                    continue;
                }
                let shared = other
                    .tags
                    .iter()
                    .filter(|t| own_tags.contains(t.as_str()))
                    .count();
                if shared > 0 {
                    shared_counts.insert(other.id, shared);
                }
            }
        }

        let mut scored: Vec<(i64, usize)> = shared_counts.into_iter().collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (target_id, shared) in scored {
            if candidates.len() >= MAX_CANDIDATES {
                break;
            }
            seen.insert(target_id);
            candidates.push(LinkCandidate {
                target_id,
                relationship: Relationship::Related,
                strength: (0.3 + shared as f64 * 0.2).min(0.9),
            });
        }
        Ok(())
    }

    /// Embedding strategy: cosine over the highest-scoring stored vectors
    fn detect_by_embedding(
        &self,
        source_vector: &[f32],
        filter: &MemoryFilter,
        candidates: &mut Vec<LinkCandidate>,
        seen: &mut HashSet<i64>,
    ) -> Result<()> {
        let stored = self
            .store
            .embeddings_matching(filter, EMBEDDING_SCAN_LIMIT)?;

        let mut scored: Vec<(i64, f64)> = stored
            .into_iter()
            .filter(|(id, _)| !seen.contains(id))
            .filter_map(|(id, embedding)| {
                let cos = cosine_similarity(source_vector, &embedding.vector) as f64;
                (cos >= EMBEDDING_FLOOR).then_some((id, cos))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (target_id, cos) in scored {
            if candidates.len() >= MAX_CANDIDATES {
                break;
            }
            seen.insert(target_id);
            candidates.push(LinkCandidate {
                target_id,
                relationship: Relationship::Related,
                strength: cos.min(0.9),
            });
        }
        Ok(())
    }

    /// FTS + Jaccard fallback for memories without an embedding
    fn detect_by_text(
        &self,
        memory: &Memory,
        filter: &MemoryFilter,
        candidates: &mut Vec<LinkCandidate>,
        seen: &mut HashSet<i64>,
    ) -> Result<()> {
        let snippet: String = memory.content.chars().take(200).collect();
        let query = format!("{} {}", memory.title, snippet);
        let own_tokens = tokenize(&query);
        if own_tokens.is_empty() {
            return Ok(());
        }

        // OR over the source tokens casts a wide net; Jaccard narrows it
        let mut terms: Vec<String> = own_tokens.iter().cloned().collect();
        terms.sort_unstable();
        terms.truncate(12);
        let matches = self.store.fts_search_any(&terms, filter, 20)?;
        let mut scored: Vec<(i64, f64)> = matches
            .into_iter()
            .filter(|(other, _)| !seen.contains(&other.id))
            .filter_map(|(other, _)| {
                let other_tokens = tokenize(&format!("{} {}", other.title, other.content));
                let sim = jaccard_similarity(&own_tokens, &other_tokens);
                (sim >= JACCARD_FLOOR).then_some((other.id, sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (target_id, sim) in scored {
            if candidates.len() >= MAX_CANDIDATES {
                break;
            }
            seen.insert(target_id);
            candidates.push(LinkCandidate {
                target_id,
                relationship: Relationship::Related,
                strength: (sim + 0.2).min(0.7),
            });
        }
        Ok(())
    }

    /// Detect and persist links for a memory; returns the created edges.
    /// Existing edges are left untouched by the UNIQUE constraint.
    pub fn auto_link(&self, memory: &Memory) -> Result<Vec<MemoryLink>> {
        let mut created = Vec::new();
        for candidate in self.detect_relationships(memory)? {
            // The candidate may vanish between detection and insertion
            if self.store.link_between(memory.id, candidate.target_id)?.is_some() {
                continue;
            }
            if let Some(link) = self.store.create_link(
                memory.id,
                candidate.target_id,
                candidate.relationship,
                candidate.strength,
            )? {
                created.push(link);
            }
        }
        Ok(created)
    }

    /// Hebbian co-access strengthening.
    ///
    /// Every other memory accessed within the trailing window gets its
    /// link to the accessed memory strengthened by +0.05 (capped at 1.0);
    /// pairs with no link yet get a weak `related` edge.
    pub fn strengthen_co_accessed(
        &self,
        memory_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryLink>> {
        let window = chrono::Duration::from_std(COACCESS_WINDOW)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let co_accessed = self.store.accessed_within(window, memory_id, now)?;

        let mut touched = Vec::new();
        for other_id in co_accessed {
            match self.store.link_between(memory_id, other_id)? {
                Some(link) => {
                    let strengthened = (link.strength + HEBBIAN_INCREMENT).min(1.0);
                    self.store.set_link_strength(link.id, strengthened)?;
                    touched.push(MemoryLink {
                        strength: strengthened,
                        ..link
                    });
                }
                None => {
                    if let Some(link) = self.store.create_link(
                        memory_id,
                        other_id,
                        Relationship::Related,
                        HEBBIAN_INITIAL,
                    )? {
                        touched.push(link);
                    }
                }
            }
        }
        Ok(touched)
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

    fn setup() -> (LinkEngine, Arc<MemoryStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            MemoryStore::open(Some(dir.path().join("links.db")), 10 * 1024).unwrap(),
        );
        (LinkEngine::new(store.clone()), store, dir)
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
                salience: 0.6,
                metadata: Default::default(),
            })
            .unwrap()
    }

    #[test]
    fn test_tokenize_strips_short_and_punct() {
        let tokens = tokenize("An JWT, is set-up now!");
        assert!(tokens.contains("jwt"));
        assert!(tokens.contains("set"));
        assert!(tokens.contains("now"));
        assert!(!tokens.contains("is"));
        assert!(!tokens.contains("an"));
    }

    #[test]
    fn test_jaccard_laws() {
        let x = tokenize("alpha beta gamma");
        let y = tokenize("beta gamma delta");
        assert_eq!(jaccard_similarity(&x, &x), 1.0);
        assert_eq!(jaccard_similarity(&x, &y), jaccard_similarity(&y, &x));
        assert!((jaccard_similarity(&x, &y) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tag_overlap_detection() {
        let (engine, store, _dir) = setup();
        let first = seed(&store, "JWT token setup", "auth service tokens", &["jwt", "auth"]);
        let second = seed(
            &store,
            "JWT middleware",
            "validates tokens on requests",
            &["jwt", "middleware"],
        );

        let candidates = engine.detect_relationships(&second).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].target_id, first.id);
        assert_eq!(candidates[0].relationship, Relationship::Related);
        // One shared tag: 0.3 + 0.2
        assert!((candidates[0].strength - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_shared_count_raises_strength() {
        let (engine, store, _dir) = setup();
        seed(&store, "one", "x", &["a", "b", "c"]);
        let probe = seed(&store, "two", "y", &["a", "b", "c"]);

        let candidates = engine.detect_relationships(&probe).unwrap();
        // Three shared tags: 0.3 + 3 * 0.2 = 0.9 (cap)
        assert!((candidates[0].strength - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_text_fallback_without_embedding() {
        let (engine, store, _dir) = setup();
        let first = seed(
            &store,
            "Retry with backoff",
            "the client retries the request with exponential backoff",
            &[],
        );
        let probe = seed(
            &store,
            "Client retries",
            "client retries request with exponential backoff policy",
            &[],
        );
        seed(&store, "unrelated", "completely different topic", &[]);

        let candidates = engine.detect_relationships(&probe).unwrap();
        assert!(candidates.iter().any(|c| c.target_id == first.id));
        let hit = candidates.iter().find(|c| c.target_id == first.id).unwrap();
        assert!(hit.strength <= 0.7);
        assert!(hit.strength >= JACCARD_FLOOR + 0.2 - 1e-9);
    }

    #[test]
    fn test_candidates_capped_and_deduped() {
        let (engine, store, _dir) = setup();
        for i in 0..8 {
            seed(&store, &format!("tagged {i}"), "x", &["shared"]);
        }
        let probe = seed(&store, "probe", "y", &["shared"]);

        let candidates = engine.detect_relationships(&probe).unwrap();
        assert!(candidates.len() <= 5);
        let mut ids: Vec<i64> = candidates.iter().map(|c| c.target_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), candidates.len());
        assert!(!ids.contains(&probe.id));
    }

    #[test]
    fn test_auto_link_persists_edges() {
        let (engine, store, _dir) = setup();
        let first = seed(&store, "a", "x", &["t"]);
        let probe = seed(&store, "b", "y", &["t"]);

        let created = engine.auto_link(&probe).unwrap();
        assert_eq!(created.len(), 1);
        assert!(store.link_between(first.id, probe.id).unwrap().is_some());

        // Second pass is a no-op
        let again = engine.auto_link(&probe).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_hebbian_creates_weak_link() {
        let (engine, store, _dir) = setup();
        let a = seed(&store, "a", "x", &[]);
        let b = seed(&store, "b", "y", &[]);

        // Both were just inserted, so both sit inside the co-access window
        let touched = engine.strengthen_co_accessed(a.id, Utc::now()).unwrap();
        assert_eq!(touched.len(), 1);
        assert!((touched[0].strength - HEBBIAN_INITIAL).abs() < 1e-9);
        assert!(store.link_between(a.id, b.id).unwrap().is_some());
    }

    #[test]
    fn test_hebbian_strengthens_existing_link() {
        let (engine, store, _dir) = setup();
        let a = seed(&store, "a", "x", &[]);
        let b = seed(&store, "b", "y", &[]);
        store
            .create_link(b.id, a.id, Relationship::Extends, 0.5)
            .unwrap();

        let touched = engine.strengthen_co_accessed(a.id, Utc::now()).unwrap();
        assert_eq!(touched.len(), 1);
        assert!((touched[0].strength - 0.55).abs() < 1e-9);
        // Direction and relationship survive
        let link = store.link_between(a.id, b.id).unwrap().unwrap();
        assert_eq!(link.relationship, Relationship::Extends);
        assert_eq!(link.source_id, b.id);
    }

    #[test]
    fn test_hebbian_caps_at_one() {
        let (engine, store, _dir) = setup();
        let a = seed(&store, "a", "x", &[]);
        let b = seed(&store, "b", "y", &[]);
        store
            .create_link(a.id, b.id, Relationship::Related, 0.98)
            .unwrap();

        let touched = engine.strengthen_co_accessed(a.id, Utc::now()).unwrap();
        assert!((touched[0].strength - 1.0).abs() < 1e-9);
    }
}
