//! Hybrid search
//!
//! Combines keyword (FTS5/BM25), vector cosine, decayed salience, graph
//! neighborhood, and spreading activation into one ranked pipeline. Every
//! signal degrades gracefully: no embedding backend means an empty vector
//! map, an unlinked memory gets no link boost, and a cold activation cache
//! contributes nothing.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::activation::ActivationCache;
use crate::config::EngineConfig;
use crate::decay;
use crate::embeddings::{cosine_similarity, EmbeddingService};
use crate::memory::{Memory, RecallOptions, SearchHit};
use crate::salience;
use crate::storage::{MemoryFilter, MemoryOrder, MemoryStore, Result};

// ============================================================================
// SCORE WEIGHTS
// ============================================================================

const FTS_WEIGHT: f64 = 0.30;
const VECTOR_WEIGHT: f64 = 0.30;
const DECAYED_WEIGHT: f64 = 0.25;
const PRIORITY_WEIGHT: f64 = 0.10;

/// Score assumed for rows that matched only the vector scan
const FTS_DEFAULT_SCORE: f64 = 0.3;

/// Minimum cosine similarity kept by the vector scan
const VECTOR_FLOOR: f64 = 0.30;

/// Upper bound on memories linearly scanned for vector similarity
const VECTOR_SCAN_LIMIT: usize = 2000;

const CATEGORY_BOOST: f64 = 0.10;
const LINK_BOOST_CAP: f64 = 0.15;
const TAG_BOOST_CAP: f64 = 0.10;

/// How many top results are soft-accessed after a search
pub const SOFT_ACCESS_TOP_N: usize = 5;

/// Query embeddings cached to avoid re-embedding repeated searches
const QUERY_CACHE_CAPACITY: usize = 100;

// ============================================================================
// FTS QUERY SANITIZER
// ============================================================================

/// Escape a raw query for FTS5.
///
/// Any term containing an FTS operator character (`- : * ^ ( ) & | . "`)
/// or equal to a boolean keyword (`AND`, `OR`, `NOT`, `NEAR`) is wrapped
/// in double quotes so it matches literally; embedded quotes are doubled.
pub fn sanitize_fts_query(query: &str) -> String {
    const OPERATOR_CHARS: &[char] = &['-', ':', '*', '^', '(', ')', '&', '|', '.', '"'];

    query
        .split_whitespace()
        .filter_map(|term| {
            // Quoting an empty or quote-only fragment yields noise
            let stripped: String = term.chars().filter(|c| *c != '"').collect();
            let needs_quoting = term.chars().any(|c| OPERATOR_CHARS.contains(&c))
                || matches!(term, "AND" | "OR" | "NOT" | "NEAR");
            if needs_quoting {
                if stripped.is_empty() {
                    None
                } else {
                    Some(format!("\"{}\"", stripped.replace('"', "\"\"")))
                }
            } else {
                Some(term.to_string())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the MATCH expression for a recall query.
///
/// Plain alphanumeric terms become prefix queries (`postgres*` finds
/// "postgresql"); anything carrying operator characters is quoted
/// literally by the same rule as [`sanitize_fts_query`].
fn build_recall_match(query: &str) -> String {
    query
        .split_whitespace()
        .filter_map(|term| {
            if !term.is_empty() && term.chars().all(|c| c.is_alphanumeric()) {
                Some(format!("{term}*"))
            } else {
                let stripped: String = term.chars().filter(|c| *c != '"').collect();
                if stripped.is_empty() {
                    None
                } else {
                    Some(format!("\"{}\"", stripped.replace('"', "\"\"")))
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// SEARCH ENGINE
// ============================================================================

/// Hybrid search over the store
pub struct SearchEngine {
    store: Arc<MemoryStore>,
    embedder: Arc<EmbeddingService>,
    activation: Arc<Mutex<ActivationCache>>,
    config: EngineConfig,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Arc<EmbeddingService>,
        activation: Arc<Mutex<ActivationCache>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            activation,
            config,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Run the ranked pipeline. `active_project` scopes the candidate set;
    /// the caller soft-accesses the top results afterwards.
    pub fn search(&self, options: &RecallOptions, active_project: &str) -> Result<Vec<SearchHit>> {
        let now = Utc::now();
        let filter = self.build_filter(options, active_project);

        let query_category = salience::category_hint(&options.query);
        let query_tags = salience::extract_tags(&options.query);

        // Vector scan; any failure here yields an empty map, never an error
        let vector_scores = self.vector_scores(&options.query, &filter, options.limit);

        // Keyword candidates; empty queries browse by decayed score instead
        let mut candidates: HashMap<i64, (Memory, Option<f64>)> = HashMap::new();
        if options.query.trim().is_empty() {
            let limit = options.limit.max(SOFT_ACCESS_TOP_N) * 3;
            for memory in
                self.store
                    .bulk_select(&filter, MemoryOrder::DecayedScore, limit, 0)?
            {
                candidates.insert(memory.id, (memory, None));
            }
        } else {
            let limit = options.limit.max(SOFT_ACCESS_TOP_N) * 3;
            let expr = build_recall_match(&options.query);
            for (memory, rank) in self.store.fts_search_expr(&expr, &filter, limit)? {
                candidates.insert(memory.id, (memory, Some(rank)));
            }
        }

        // Vector-only hits join the candidate set without an FTS rank
        for id in vector_scores.keys() {
            if !candidates.contains_key(id) {
                if let Some(memory) = self.store.get(*id)? {
                    candidates.insert(*id, (memory, None));
                }
            }
        }

        let mut hits: Vec<SearchHit> = Vec::with_capacity(candidates.len());
        for (id, (memory, fts_rank)) in candidates {
            let decayed = decay::decayed_score(&memory, now, &self.config);
            if !options.include_decayed && decayed < self.config.salience_threshold {
                continue;
            }

            let fts_score = fts_rank.map(|rank| 1.0 / (1.0 + rank.abs()));
            let vector_similarity = vector_scores.get(&id).copied();
            let activation_boost = self
                .activation
                .lock()
                .map(|mut cache| cache.boost(id, now))
                .unwrap_or(0.0);

            let relevance = FTS_WEIGHT * fts_score.unwrap_or(FTS_DEFAULT_SCORE)
                + VECTOR_WEIGHT * vector_similarity.unwrap_or(0.0)
                + DECAYED_WEIGHT * decayed
                + PRIORITY_WEIGHT * decay::priority(&memory, decayed, now)
                + recency_boost(&memory, now)
                + category_boost(&memory, query_category)
                + self.link_boost(&memory)?
                + tag_boost(&memory, &query_tags)
                + activation_boost;

            hits.push(SearchHit {
                memory,
                relevance,
                fts_score,
                vector_similarity,
                activation_boost,
            });
        }

        hits.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(options.limit);
        Ok(hits)
    }

    fn build_filter(&self, options: &RecallOptions, active_project: &str) -> MemoryFilter {
        let project = options
            .project
            .clone()
            .unwrap_or_else(|| active_project.to_string());
        MemoryFilter {
            project: Some(project),
            category: options.category,
            memory_type: options.memory_type,
            tags: options.tags.clone(),
            min_salience: options.min_salience,
        }
    }

    /// Linear cosine scan over stored embeddings. Returns an empty map
    /// when the query is empty, the backend is unavailable, or anything
    /// fails along the way.
    fn vector_scores(
        &self,
        query: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> HashMap<i64, f64> {
        if query.trim().is_empty() || !self.embedder.is_ready() {
            return HashMap::new();
        }

        let query_vector = {
            let mut cache = match self.query_cache.lock() {
                Ok(cache) => cache,
                Err(_) => return HashMap::new(),
            };
            if let Some(vector) = cache.get(query) {
                vector.clone()
            } else {
                match self.embedder.embed(query) {
                    Ok(embedding) => {
                        cache.put(query.to_string(), embedding.vector.clone());
                        embedding.vector
                    }
                    Err(e) => {
                        tracing::debug!("Query embedding failed: {}", e);
                        return HashMap::new();
                    }
                }
            }
        };

        let stored = match self.store.embeddings_matching(filter, VECTOR_SCAN_LIMIT) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Vector scan failed: {}", e);
                return HashMap::new();
            }
        };

        let mut scored: Vec<(i64, f64)> = stored
            .into_iter()
            .filter_map(|(id, embedding)| {
                let similarity = cosine_similarity(&query_vector, &embedding.vector) as f64;
                (similarity >= VECTOR_FLOOR).then_some((id, similarity))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit * 2);
        scored.into_iter().collect()
    }

    /// Strength-weighted mean of neighbor salience, scaled and capped
    fn link_boost(&self, memory: &Memory) -> Result<f64> {
        let links = self.store.links_for(memory.id)?;
        if links.is_empty() {
            return Ok(0.0);
        }

        let mut weighted_sum = 0.0;
        let mut total_strength = 0.0;
        for link in &links {
            let Some(neighbor_id) = link.other_endpoint(memory.id) else {
                continue;
            };
            if let Some(neighbor) = self.store.get(neighbor_id)? {
                weighted_sum += link.strength * neighbor.salience;
                total_strength += link.strength;
            }
        }
        if total_strength <= 0.0 {
            return Ok(0.0);
        }
        Ok(((weighted_sum / total_strength) * 0.2).min(LINK_BOOST_CAP))
    }
}

fn recency_boost(memory: &Memory, now: DateTime<Utc>) -> f64 {
    let hours = memory.hours_since_access(now);
    if hours < 1.0 {
        0.10
    } else if hours < 24.0 {
        0.05
    } else {
        0.0
    }
}

fn category_boost(memory: &Memory, query_category: Option<crate::memory::Category>) -> f64 {
    match query_category {
        Some(category) if category == memory.category => CATEGORY_BOOST,
        _ => 0.0,
    }
}

/// Fraction of query tags matching any memory tag by partial substring
fn tag_boost(memory: &Memory, query_tags: &[String]) -> f64 {
    if query_tags.is_empty() || memory.tags.is_empty() {
        return 0.0;
    }
    let matching = query_tags
        .iter()
        .filter(|qt| {
            memory
                .tags
                .iter()
                .any(|mt| mt.contains(qt.as_str()) || qt.contains(mt.as_str()))
        })
        .count();
    (matching as f64 / query_tags.len() as f64 * TAG_BOOST_CAP).min(TAG_BOOST_CAP)
}

// ============================================================================
// TESTS
// ============================================================================
