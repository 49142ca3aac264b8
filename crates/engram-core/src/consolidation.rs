//! Consolidator
//!
//! The periodic pass that keeps the store healthy: promotes earned
//! short-term memories to long-term, deletes what decayed away, enforces
//! capacity caps, persists decayed scores, evolves salience over the
//! graph, and links freshly detected contradictions.
//!
//! Everything runs inside one immediate transaction; sub-step failures
//! in salience evolution and the contradiction pass are logged and
//! contribute zero counts instead of rolling the pass back.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rusqlite::{params, Transaction};

use crate::config::EngineConfig;
use crate::contradiction::{check_pair, Contradiction};
use crate::decay::{self, DecayOutcome};
use crate::events::EngineEvent;
use crate::links::{jaccard_similarity, tokenize};
use crate::memory::{Category, ConsolidationReport, Memory, MemoryType};
use crate::storage::{persist_event_tx, row_to_memory, MemoryFilter, MemoryStore, Result};

/// Soft wall-clock limit for one pass; exceeded phases finish with
/// partial counts and a warning instead of rolling back
const SOFT_DEADLINE_MS: u128 = 5_000;

/// Contradiction pass inside consolidation uses a stricter threshold
const CONSOLIDATION_CONTRADICTION_MIN: f64 = 0.50;
const CONSOLIDATION_CONTRADICTION_LIMIT: usize = 50;

/// Hub bonus parameters: well-connected knowledge gains salience
const HUB_MIN_LINKS: i64 = 2;
const HUB_BONUS_CAP: f64 = 0.10;
const HUB_BONUS_PER_LOG_LINK: f64 = 0.03;

/// Both sides of a contradiction lose a little standing
const CONTRADICTION_PENALTY: f64 = 0.02;
const CONTRADICTION_PENALTY_FLOOR: f64 = 0.30;

/// Default similarity threshold for `merge_similar`
pub const MERGE_THRESHOLD: f64 = 0.25;

/// Consolidation and cleanup passes over the store
pub struct Consolidator {
    store: Arc<MemoryStore>,
    config: EngineConfig,
}

impl Consolidator {
    pub fn new(store: Arc<MemoryStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Whether a consolidation pass is due: short-term storage approaching
    /// capacity, or enough short-term memories decayed under the threshold.
    pub fn should_trigger(&self) -> Result<bool> {
        let short_term = self.store.count(&MemoryFilter {
            memory_type: Some(MemoryType::ShortTerm),
            ..Default::default()
        })?;
        if short_term as f64 > self.config.max_short_term_memories as f64 * 0.8 {
            return Ok(true);
        }

        let decayed_below = self.store.with_transaction(|tx| {
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM memories
                 WHERE memory_type = 'short_term'
                   AND COALESCE(decayed_score, salience) < ?1",
                params![self.config.salience_threshold],
                |row| row.get(0),
            )?;
            Ok(count)
        })?;
        Ok(decayed_below > 10)
    }

    /// Run one full consolidation pass atomically.
    pub fn consolidate(&self) -> Result<ConsolidationReport> {
        let started = Instant::now();
        let config = self.config.clone();

        let mut report = self.store.with_immediate_transaction(|tx| {
            let mut report = ConsolidationReport::default();
            let now = Utc::now();

            // Phase 1: classify short-term memories
            let scan_limit = config.max_short_term_memories * 2;
            let pool = load_memories(
                tx,
                "SELECT m.* FROM memories m
                 WHERE m.memory_type = 'short_term'
                 ORDER BY m.last_accessed ASC LIMIT ?1",
                params![scan_limit as i64],
            )?;

            let mut deletions: Vec<&Memory> = Vec::new();
            for memory in &pool {
                let (outcome, decayed) = decay::classify(memory, now, &config);
                match outcome {
                    DecayOutcome::Promote => {
                        tx.execute(
                            "UPDATE memories SET memory_type = 'long_term' WHERE id = ?1",
                            params![memory.id],
                        )?;
                        report.consolidated += 1;
                    }
                    DecayOutcome::Delete => deletions.push(memory),
                    DecayOutcome::Update => {
                        if (decayed - memory.decayed_score).abs() > 0.01 {
                            tx.execute(
                                "UPDATE memories SET decayed_score = ?1 WHERE id = ?2",
                                params![decayed, memory.id],
                            )?;
                        }
                        report.decayed += 1;
                    }
                }
                if started.elapsed().as_millis() > SOFT_DEADLINE_MS {
                    tracing::warn!("Consolidation classification hit the soft deadline");
                    break;
                }
            }

            for memory in deletions {
                delete_memory(tx, memory.id, &memory.title)?;
                report.deleted += 1;
            }

            // Phase 2: capacity caps
            report.deleted += enforce_cap(
                tx,
                "short_term",
                config.max_short_term_memories,
                "salience ASC, last_accessed ASC",
            )?;
            report.deleted += enforce_cap(
                tx,
                "long_term",
                config.max_long_term_memories,
                "salience ASC, access_count ASC, last_accessed ASC",
            )?;

            // Phase 3: persist decayed scores where they moved
            report.decayed += persist_decay_scores(tx, &config)?;

            // Phase 4: salience evolution, best-effort
            match evolve_salience(tx) {
                Ok(evolved) => report.salience_evolved = evolved,
                Err(e) => tracing::warn!("Salience evolution failed, skipping: {}", e),
            }

            // Phase 5: contradiction pass, best-effort
            match detect_and_link_contradictions(tx, started) {
                Ok((found, linked)) => {
                    report.contradictions_found = found;
                    report.contradictions_linked = linked;
                }
                Err(e) => tracing::warn!("Contradiction pass failed, skipping: {}", e),
            }

            report.duration_ms = started.elapsed().as_millis() as i64;
            persist_event_tx(
                tx,
                &EngineEvent::ConsolidationComplete {
                    report: report.clone(),
                    timestamp: now,
                },
            )?;
            Ok(report)
        })?;

        report.duration_ms = started.elapsed().as_millis() as i64;
        tracing::info!(
            consolidated = report.consolidated,
            deleted = report.deleted,
            decayed = report.decayed,
            "Consolidation pass complete"
        );
        Ok(report)
    }

    /// Merge clusters of near-duplicate short-term memories.
    ///
    /// Groups by (project, category), clusters by combined title/content
    /// Jaccard, promotes the strongest member of each cluster with merged
    /// content and deletes the rest.
    pub fn merge_similar(&self, project: Option<&str>, threshold: f64) -> Result<i64> {
        let project = project.map(|p| p.to_string());
        self.store.with_immediate_transaction(|tx| {
            let pool = match &project {
                Some(p) => load_memories(
                    tx,
                    "SELECT m.* FROM memories m
                     WHERE m.memory_type = 'short_term' AND m.project = ?1
                     ORDER BY m.salience DESC",
                    params![p],
                )?,
                None => load_memories(
                    tx,
                    "SELECT m.* FROM memories m
                     WHERE m.memory_type = 'short_term'
                     ORDER BY m.salience DESC",
                    params![],
                )?,
            };

            let mut merged_clusters = 0_i64;
            let mut groups: std::collections::HashMap<(Option<String>, Category), Vec<&Memory>> =
                std::collections::HashMap::new();
            for memory in &pool {
                groups
                    .entry((memory.project.clone(), memory.category))
                    .or_default()
                    .push(memory);
            }

            for members in groups.values() {
                let mut clustered = vec![false; members.len()];
                for i in 0..members.len() {
                    if clustered[i] {
                        continue;
                    }
                    let mut cluster = vec![i];
                    let base_title = tokenize(&members[i].title);
                    let base_content = tokenize(&members[i].content);

                    for (j, member) in members.iter().enumerate().skip(i + 1) {
                        if clustered[j] {
                            continue;
                        }
                        let similarity = 0.6
                            * jaccard_similarity(&base_content, &tokenize(&member.content))
                            + 0.4 * jaccard_similarity(&base_title, &tokenize(&member.title));
                        if similarity >= threshold {
                            cluster.push(j);
                        }
                    }

                    if cluster.len() < 2 {
                        continue;
                    }
                    for &j in &cluster {
                        clustered[j] = true;
                    }

                    // Members are salience-sorted, so the first is the base
                    let base = members[cluster[0]];
                    let others: Vec<&Memory> =
                        cluster[1..].iter().map(|&j| members[j]).collect();
                    merge_cluster(tx, base, &others)?;
                    merged_clusters += 1;
                }
            }

            Ok(merged_clusters)
        })
    }

    /// Consolidate, merge duplicates, and vacuum when anything was removed
    pub fn full_cleanup(&self) -> Result<ConsolidationReport> {
        let mut report = self.consolidate()?;
        report.merged = self.merge_similar(None, MERGE_THRESHOLD)?;
        if report.deleted > 0 || report.merged > 0 {
            self.store.vacuum()?;
        }
        Ok(report)
    }

    /// Recompute decayed scores for the most recently accessed memories,
    /// read-only. Returns the changes that moved more than 0.01.
    pub fn compute_decay_changes(&self, limit: usize) -> Result<Vec<crate::events::DecayChange>> {
        let now = Utc::now();
        let recent = self.store.recently_accessed(limit)?;
        let mut changes = Vec::new();
        for memory in recent {
            let decayed = decay::decayed_score(&memory, now, &self.config);
            if (decayed - memory.decayed_score).abs() > 0.01 {
                changes.push(crate::events::DecayChange {
                    id: memory.id,
                    previous: memory.decayed_score,
                    current: decayed,
                });
            }
        }
        Ok(changes)
    }

    /// Persist a batch of computed decay changes
    pub fn persist_decay_changes(&self, changes: &[crate::events::DecayChange]) -> Result<usize> {
        for change in changes {
            self.store.update_decayed_score(change.id, change.current)?;
        }
        Ok(changes.len())
    }

    /// Recompute and persist in one step
    pub fn refresh_decay_scores(&self, limit: usize) -> Result<Vec<crate::events::DecayChange>> {
        let changes = self.compute_decay_changes(limit)?;
        self.persist_decay_changes(&changes)?;
        Ok(changes)
    }
}

// ============================================================================
// TRANSACTION HELPERS
// ============================================================================

fn load_memories<P: rusqlite::Params>(
    tx: &Transaction,
    sql: &str,
    params: P,
) -> Result<Vec<Memory>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_memory)?;
    let mut memories = Vec::new();
    for row in rows {
        memories.push(row?);
    }
    Ok(memories)
}

fn delete_memory(tx: &Transaction, id: i64, title: &str) -> Result<()> {
    tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    persist_event_tx(
        tx,
        &EngineEvent::MemoryDeleted {
            id,
            title: title.to_string(),
            timestamp: Utc::now(),
        },
    )?;
    Ok(())
}

/// Delete lowest-priority rows above the per-type cap
fn enforce_cap(
    tx: &Transaction,
    memory_type: &str,
    cap: usize,
    order: &str,
) -> Result<i64> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM memories WHERE memory_type = ?1",
        params![memory_type],
        |row| row.get(0),
    )?;
    let excess = count - cap as i64;
    if excess <= 0 {
        return Ok(0);
    }

    let sql = format!(
        "SELECT id, title FROM memories WHERE memory_type = ?1 ORDER BY {order} LIMIT ?2"
    );
    let victims: Vec<(i64, String)> = {
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params![memory_type, excess], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        let mut victims = Vec::new();
        for row in rows {
            victims.push(row?);
        }
        victims
    };

    for (id, title) in &victims {
        delete_memory(tx, *id, title)?;
    }
    Ok(victims.len() as i64)
}

/// Persist freshly computed decayed scores where |change| > 0.01
fn persist_decay_scores(tx: &Transaction, config: &EngineConfig) -> Result<i64> {
    let now = Utc::now();
    let pool = load_memories(tx, "SELECT m.* FROM memories m", params![])?;
    let mut updated = 0;
    for memory in pool {
        let decayed = decay::decayed_score(&memory, now, config);
        if (decayed - memory.decayed_score).abs() > 0.01 {
            tx.execute(
                "UPDATE memories SET decayed_score = ?1 WHERE id = ?2",
                params![decayed, memory.id],
            )?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Hub bonus and contradiction penalty
fn evolve_salience(tx: &Transaction) -> Result<i64> {
    let mut evolved = 0_i64;

    // Hub bonus: connected long-term/episodic knowledge gains standing
    let hubs: Vec<(i64, i64)> = {
        let mut stmt = tx.prepare(
            "SELECT m.id, COUNT(l.id) AS degree
             FROM memories m
             JOIN memory_links l ON l.source_id = m.id OR l.target_id = m.id
             WHERE m.memory_type IN ('long_term', 'episodic')
             GROUP BY m.id
             HAVING degree >= ?1",
        )?;
        let rows = stmt.query_map(params![HUB_MIN_LINKS], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        let mut hubs = Vec::new();
        for row in rows {
            hubs.push(row?);
        }
        hubs
    };

    for (id, degree) in hubs {
        let bonus = ((degree as f64).log2() * HUB_BONUS_PER_LOG_LINK).min(HUB_BONUS_CAP);
        let changed = tx.execute(
            "UPDATE memories SET salience = MIN(1.0, salience + ?1) WHERE id = ?2",
            params![bonus, id],
        )?;
        evolved += changed as i64;
    }

    // Contradiction penalty: both sides of a conflict lose a little
    let changed = tx.execute(
        "UPDATE memories SET salience = salience - ?1
         WHERE salience > ?2
           AND id IN (
               SELECT source_id FROM memory_links WHERE relationship = 'contradicts'
               UNION
               SELECT target_id FROM memory_links WHERE relationship = 'contradicts'
           )",
        params![CONTRADICTION_PENALTY, CONTRADICTION_PENALTY_FLOOR],
    )?;
    evolved += changed as i64;

    // Keep the decayed-score invariant after salience moved
    tx.execute(
        "UPDATE memories SET decayed_score = MIN(COALESCE(decayed_score, salience), salience)",
        [],
    )?;

    Ok(evolved)
}

/// Detect contradictions among the strongest recent memories and link them
fn detect_and_link_contradictions(tx: &Transaction, started: Instant) -> Result<(i64, i64)> {
    let now = Utc::now();
    let mut pool = load_memories(
        tx,
        "SELECT m.* FROM memories m ORDER BY m.last_accessed DESC LIMIT 1000",
        params![],
    )?;
    pool.sort_by(|a, b| {
        let score_a = a.salience * (-a.hours_since_access(now) / 24.0).exp();
        let score_b = b.salience * (-b.hours_since_access(now) / 24.0).exp();
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    pool.truncate(200);

    let mut found: Vec<Contradiction> = Vec::new();
    'outer: for i in 0..pool.len() {
        for j in (i + 1)..pool.len() {
            if let Some(hit) = check_pair(&pool[i], &pool[j], CONSOLIDATION_CONTRADICTION_MIN) {
                found.push(hit);
                if found.len() >= CONSOLIDATION_CONTRADICTION_LIMIT {
                    break 'outer;
                }
            }
        }
        if started.elapsed().as_millis() > SOFT_DEADLINE_MS {
            tracing::warn!("Contradiction pass hit the soft deadline, partial results");
            break;
        }
    }

    let mut linked = 0_i64;
    for hit in &found {
        let changed = tx.execute(
            "INSERT OR IGNORE INTO memory_links
                (source_id, target_id, relationship, strength, created_at)
             SELECT ?1, ?2, 'contradicts', ?3, ?4
             WHERE NOT EXISTS (
                 SELECT 1 FROM memory_links
                 WHERE (source_id = ?1 AND target_id = ?2)
                    OR (source_id = ?2 AND target_id = ?1)
             )",
            params![
                hit.source_id,
                hit.target_id,
                hit.score,
                now.to_rfc3339()
            ],
        )?;
        linked += changed as i64;
    }

    Ok((found.len() as i64, linked))
}

/// Fold a cluster into its strongest member
fn merge_cluster(tx: &Transaction, base: &Memory, others: &[&Memory]) -> Result<()> {
    let mut content = base.content.clone();
    content.push_str("\n\nConsolidated context:");
    for other in others {
        let snippet: String = other.content.chars().take(160).collect();
        content.push_str(&format!("\n- {}: {}", other.title, snippet));
    }

    let mut tags: Vec<String> = base.tags.clone();
    for other in others {
        for tag in &other.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
    let access_count: i64 =
        base.access_count + others.iter().map(|m| m.access_count).sum::<i64>();
    let salience = (base.salience + 0.10).min(1.0);

    tx.execute(
        "UPDATE memories SET
            memory_type = 'long_term',
            content = ?1,
            tags = ?2,
            access_count = ?3,
            salience = ?4,
            decayed_score = MIN(COALESCE(decayed_score, ?4), ?4)
         WHERE id = ?5",
        params![
            content,
            serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string()),
            access_count,
            salience,
            base.id
        ],
    )?;

    for other in others {
        delete_memory(tx, other.id, &other.title)?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
