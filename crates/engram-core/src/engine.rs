//! Memory engine - the service coordinator
//!
//! Boots storage, runs the startup consolidation, owns the project
//! context and pause gate, and exposes every read/write operation the
//! adapters call. Best-effort subsystems (embedding generation,
//! auto-linking, Hebbian strengthening) are caught and logged here; they
//! never fail the operation that triggered them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::activation::ActivationCache;
use crate::config::{EngineConfig, ENRICHMENT_COOLDOWN};
use crate::consolidation::{Consolidator, MERGE_THRESHOLD};
use crate::contradiction::{Contradiction, ContradictionDetector, ContradictionScan};
use crate::decay;
use crate::embeddings::EmbeddingService;
use crate::error::{EngineError, Result};
use crate::events::{publish, EngineEvent, EventBus, StoredEvent};
use crate::links::LinkEngine;
use crate::memory::{
    ConsolidationReport, ExportedMemory, Memory, MemoryExport, MemoryInput, MemoryLink,
    MemoryStats, MemoryType, RecallOptions, SearchHit, Session, EXPORT_SCHEMA_VERSION,
};
use crate::project::{resolve_project, ControlStatus, ProjectContext};
use crate::salience;
use crate::search::{SearchEngine, SOFT_ACCESS_TOP_N};
use crate::storage::{FieldPatch, MemoryFilter, MemoryOrder, MemoryStore, NewMemory, SizeInfo};
use crate::worker::{self, WorkerHandle};

/// What `forget` operates on
#[derive(Debug, Clone)]
pub enum ForgetTarget {
    /// One memory by id
    Id(i64),
    /// Every memory matching the filter
    Filter(MemoryFilter),
}

/// Bound on how many memories one filtered forget may touch
const FORGET_SCAN_LIMIT: usize = 1000;

/// The memory engine. Cheap to clone; all state lives behind the `Arc`.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<MemoryStore>,
    bus: EventBus,
    embedder: Arc<EmbeddingService>,
    activation: Arc<Mutex<ActivationCache>>,
    links: LinkEngine,
    contradictions: ContradictionDetector,
    consolidator: Consolidator,
    search: SearchEngine,
    context: ProjectContext,
    /// memory id -> last enrichment time, one-hour cooldown
    enrichment: Mutex<HashMap<i64, DateTime<Utc>>>,
    /// Active session id, if one is open
    session: Mutex<Option<String>>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl MemoryEngine {
    /// Boot the engine: open storage, run migrations, write the lock
    /// file, resolve the project scope, and run one consolidation pass.
    ///
    /// The background worker is started separately with
    /// [`MemoryEngine::start_worker`] from inside a tokio runtime.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let embedder = Arc::new(EmbeddingService::new(config.embedding_dim));
        Self::open_with_embedder(config, embedder)
    }

    /// Boot with an explicit embedding service (tests, custom backends)
    pub fn open_with_embedder(
        config: EngineConfig,
        embedder: Arc<EmbeddingService>,
    ) -> Result<Self> {
        let store = Arc::new(MemoryStore::open(
            config.db_path.clone(),
            config.max_content_size_bytes,
        )?);
        store.write_lock_file()?;

        let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        let project = resolve_project(config.project.as_deref(), &cwd);
        tracing::info!(project = %project, db = ?store.db_path(), "Memory engine booting");

        let bus = EventBus::new();
        let activation = Arc::new(Mutex::new(ActivationCache::new()));
        let consolidator = Consolidator::new(store.clone(), config.clone());
        let search = SearchEngine::new(
            store.clone(),
            embedder.clone(),
            activation.clone(),
            config.clone(),
        );

        let engine = Self {
            inner: Arc::new(EngineInner {
                store: store.clone(),
                bus,
                embedder,
                activation,
                links: LinkEngine::new(store.clone()),
                contradictions: ContradictionDetector::new(store.clone()),
                consolidator,
                search,
                context: ProjectContext::new(project),
                enrichment: Mutex::new(HashMap::new()),
                session: Mutex::new(None),
                worker: Mutex::new(None),
                config,
            }),
        };

        // Startup consolidation keeps a long-dormant store from ballooning
        if let Err(e) = engine.inner.consolidator.consolidate() {
            tracing::warn!("Startup consolidation failed: {}", e);
        }

        let size = engine.inner.store.size_info();
        if size.warning {
            tracing::warn!("{}", size.message);
        }

        Ok(engine)
    }

    /// Start the background worker. Must be called within a tokio runtime.
    pub fn start_worker(&self) {
        let mut slot = match self.inner.worker.lock() {
            Ok(slot) => slot,
            Err(_) => return,
        };
        if slot.is_some() {
            return;
        }
        *slot = Some(worker::spawn(
            self.inner.store.clone(),
            self.inner.config.clone(),
            self.inner.bus.clone(),
            self.inner.activation.clone(),
        ));
    }

    /// Graceful shutdown: stop the worker, flush the WAL, drop the lock
    /// file. Checkpoint failures are logged and swallowed.
    pub async fn shutdown(&self) {
        let handle = self.inner.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.stop().await;
        }
        if let Err(e) = self.inner.store.checkpoint_wal() {
            tracing::warn!("WAL checkpoint on shutdown failed: {}", e);
        }
        self.inner.store.remove_lock_file();
        tracing::info!("Memory engine shut down");
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Subscribe to the live in-process event stream
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.bus.subscribe()
    }

    /// Drain the durable queue for cross-process observers
    pub fn unprocessed_events(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        Ok(self.inner.store.unprocessed_events(limit)?)
    }

    /// Acknowledge delivered events
    pub fn mark_events_processed(&self, ids: &[i64]) -> Result<usize> {
        Ok(self.inner.store.mark_events_processed(ids)?)
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    pub fn get_project(&self) -> String {
        self.inner.context.project()
    }

    pub fn set_project(&self, name: &str) {
        self.inner.context.set_project(name);
    }

    pub fn pause(&self) {
        self.inner.context.pause();
        tracing::info!("Memory writes paused");
    }

    pub fn resume(&self) {
        self.inner.context.resume();
        tracing::info!("Memory writes resumed");
    }

    pub fn control_status(&self) -> ControlStatus {
        self.inner.context.status()
    }

    pub fn size_info(&self) -> SizeInfo {
        self.inner.store.size_info()
    }

    fn check_write_allowed(&self) -> Result<()> {
        if self.inner.context.is_paused() {
            return Err(EngineError::Paused);
        }
        let size = self.inner.store.size_info();
        if size.blocked {
            return Err(EngineError::StorageBlocked(size.message));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Ingest a memory: score it, store it, embed it (best-effort), and
    /// auto-link it into the graph.
    pub fn remember(&self, input: MemoryInput) -> Result<Memory> {
        self.check_write_allowed()?;

        let assessment = salience::assess(&input.title, &input.content);
        let project = match &input.project {
            Some(p) => Some(p.clone()),
            None => {
                let active = self.inner.context.project();
                (active != crate::project::GLOBAL_PROJECT).then_some(active)
            }
        };

        let mut tags = assessment.tags.clone();
        for tag in &input.tags {
            let tag = tag.to_lowercase();
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let new = NewMemory {
            memory_type: input.memory_type.unwrap_or_default(),
            category: input.category.unwrap_or(assessment.category),
            title: input.title.clone(),
            content: input.content.clone(),
            project,
            scope: input.scope.unwrap_or(assessment.scope),
            transferable: input.transferable.unwrap_or(false),
            tags,
            salience: input.salience.unwrap_or(assessment.salience).clamp(0.0, 1.0),
            metadata: input.metadata,
        };

        let memory = self.inner.store.insert(new)?;
        self.inner.bus.broadcast(EngineEvent::MemoryCreated {
            id: memory.id,
            title: memory.title.clone(),
            category: memory.category,
            memory_type: memory.memory_type,
            project: memory.project.clone(),
            tags: memory.tags.clone(),
            timestamp: memory.created_at,
        });

        self.embed_async(memory.id, format!("{} {}", memory.title, memory.content));
        self.auto_link_best_effort(&memory);
        self.bump_session(1, 0);

        Ok(memory)
    }

    /// Generate and store the embedding off the hot path. Failures are
    /// logged; the memory simply stays without a vector.
    fn embed_async(&self, memory_id: i64, text: String) {
        if !self.inner.embedder.is_ready() {
            return;
        }
        let store = self.inner.store.clone();
        let embedder = self.inner.embedder.clone();

        let work = move || {
            match embedder.embed(&text) {
                Ok(embedding) => {
                    let model = embedder.model_name().unwrap_or("unknown").to_string();
                    if let Err(e) = store.put_embedding(memory_id, &embedding, &model) {
                        tracing::warn!("Storing embedding for {} failed: {}", memory_id, e);
                    }
                }
                Err(e) => {
                    tracing::debug!("Embedding generation for {} failed: {}", memory_id, e);
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(work);
            }
            Err(_) => work(),
        }
    }

    fn auto_link_best_effort(&self, memory: &Memory) {
        match self.inner.links.auto_link(memory) {
            Ok(created) => {
                for link in created {
                    publish(
                        &self.inner.store,
                        &self.inner.bus,
                        EngineEvent::LinkDiscovered {
                            source_id: link.source_id,
                            target_id: link.target_id,
                            relationship: link.relationship,
                            strength: link.strength,
                            timestamp: link.created_at,
                        },
                    );
                }
            }
            Err(e) => tracing::debug!("Auto-linking for {} failed: {}", memory.id, e),
        }
    }

    fn bump_session(&self, created: i64, accessed: i64) {
        let session_id = self
            .inner
            .session
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(id) = session_id {
            if let Err(e) = self.inner.store.bump_session_counters(&id, created, accessed) {
                tracing::debug!("Session counter update failed: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Access & retrieval
    // ------------------------------------------------------------------

    /// Fetch without side effects
    pub fn get_memory(&self, id: i64) -> Result<Memory> {
        self.inner
            .store
            .get(id)?
            .ok_or(EngineError::NotFound(id))
    }

    /// Reinforcing access: boosts salience with diminishing returns,
    /// spreads activation to neighbors, and strengthens co-accessed links.
    pub fn access_memory(&self, id: i64) -> Result<Memory> {
        let memory = self.get_memory(id)?;
        let now = Utc::now();

        // A fresh access resets the decay clock: decayed == salience
        let new_salience = decay::reinforced_salience(&memory, &self.inner.config);
        let updated = self
            .inner
            .store
            .record_access(id, now, new_salience, new_salience)?;
        self.inner.bus.broadcast(EngineEvent::MemoryAccessed {
            id,
            access_count: updated.access_count,
            timestamp: now,
        });

        // Spreading activation primes the neighborhood for search
        match self.inner.store.links_for(id) {
            Ok(links) => {
                if let Ok(mut cache) = self.inner.activation.lock() {
                    cache.activate(id, &links, now);
                }
            }
            Err(e) => tracing::debug!("Activation spread for {} failed: {}", id, e),
        }

        // Hebbian: fire together, wire together
        if let Err(e) = self.inner.links.strengthen_co_accessed(id, now) {
            tracing::debug!("Co-access strengthening for {} failed: {}", id, e);
        }

        self.bump_session(0, 1);
        Ok(updated)
    }

    /// Hybrid ranked search. The top results are soft-accessed: only
    /// `last_accessed` moves, salience is never touched by a search.
    pub fn recall(&self, options: RecallOptions) -> Result<Vec<SearchHit>> {
        let project = self.inner.context.project();
        let hits = self
            .inner
            .search
            .search(&options, &project)
            .map_err(EngineError::from)?;

        let now = Utc::now();
        for hit in hits.iter().take(SOFT_ACCESS_TOP_N) {
            if let Err(e) = self.inner.store.touch(hit.memory.id, now) {
                tracing::debug!("Soft access for {} failed: {}", hit.memory.id, e);
                continue;
            }
            self.inner.bus.broadcast(EngineEvent::MemoryAccessed {
                id: hit.memory.id,
                access_count: hit.memory.access_count,
                timestamp: now,
            });
        }
        self.bump_session(0, hits.len().min(SOFT_ACCESS_TOP_N) as i64);

        Ok(hits)
    }

    /// Delete one memory or a filtered set.
    ///
    /// Deleting two or more memories requires `confirm`; a dry run
    /// returns what would be deleted without touching anything.
    pub fn forget(
        &self,
        target: ForgetTarget,
        dry_run: bool,
        confirm: bool,
    ) -> Result<Vec<Memory>> {
        let victims = match &target {
            ForgetTarget::Id(id) => vec![self.get_memory(*id)?],
            ForgetTarget::Filter(filter) => self.inner.store.bulk_select(
                filter,
                MemoryOrder::Created,
                FORGET_SCAN_LIMIT,
                0,
            )?,
        };

        if dry_run {
            return Ok(victims);
        }
        if victims.len() >= 2 && !confirm {
            return Err(EngineError::BulkDeleteSafety {
                count: victims.len(),
            });
        }

        for memory in &victims {
            self.inner.store.delete(memory.id)?;
            if let Ok(mut cache) = self.inner.activation.lock() {
                cache.remove(memory.id);
            }
            self.inner.bus.broadcast(EngineEvent::MemoryDeleted {
                id: memory.id,
                title: memory.title.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(victims)
    }

    /// Grow a memory's content, bounded by the content limit and a
    /// one-hour per-memory cooldown. Within the cooldown the memory is
    /// returned unchanged.
    pub fn enrich_memory(&self, id: i64, addition: &str) -> Result<Memory> {
        self.check_write_allowed()?;
        let memory = self.get_memory(id)?;

        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(ENRICHMENT_COOLDOWN)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        {
            let enrichment = self
                .inner
                .enrichment
                .lock()
                .map_err(|_| EngineError::Storage(crate::storage::StorageError::Init(
                    "enrichment lock poisoned".into(),
                )))?;
            if let Some(last) = enrichment.get(&id) {
                if now - *last < cooldown {
                    return Ok(memory);
                }
            }
        }

        let content = format!("{}\n\n{}", memory.content, addition);
        let patch = FieldPatch {
            content: Some(content),
            ..Default::default()
        };
        let updated = self.inner.store.update_fields(id, &patch)?;
        self.inner.bus.broadcast(EngineEvent::MemoryUpdated {
            id,
            fields: vec!["content".into()],
            timestamp: now,
        });

        if let Ok(mut enrichment) = self.inner.enrichment.lock() {
            enrichment.insert(id, now);
        }
        self.embed_async(id, format!("{} {}", updated.title, updated.content));
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Graph operations
    // ------------------------------------------------------------------

    /// Links incident to a memory, with the neighbor on each edge
    pub fn get_related(&self, id: i64) -> Result<Vec<(MemoryLink, Memory)>> {
        // Ensure the anchor exists so missing ids surface as NotFound
        self.get_memory(id)?;
        let mut related = Vec::new();
        for link in self.inner.store.links_for(id)? {
            let Some(neighbor_id) = link.other_endpoint(id) else {
                continue;
            };
            if let Some(neighbor) = self.inner.store.get(neighbor_id)? {
                related.push((link, neighbor));
            }
        }
        Ok(related)
    }

    /// Create an explicit link. Self-links yield `None`.
    pub fn link_memories(
        &self,
        source_id: i64,
        target_id: i64,
        relationship: crate::memory::Relationship,
        strength: f64,
    ) -> Result<Option<MemoryLink>> {
        self.check_write_allowed()?;
        let existing = self.inner.store.link_between(source_id, target_id)?;
        let link = self
            .inner
            .store
            .create_link(source_id, target_id, relationship, strength)?;
        if let (None, Some(link)) = (existing, &link) {
            publish(
                &self.inner.store,
                &self.inner.bus,
                EngineEvent::LinkDiscovered {
                    source_id: link.source_id,
                    target_id: link.target_id,
                    relationship: link.relationship,
                    strength: link.strength,
                    timestamp: link.created_at,
                },
            );
        }
        Ok(link)
    }

    /// Remove a link between two memories
    pub fn unlink_memories(&self, a: i64, b: i64) -> Result<bool> {
        Ok(self.inner.store.delete_link_between(a, b)?)
    }

    /// Scan for contradictions; optionally create `contradicts` links
    pub fn detect_contradictions(
        &self,
        mut scan: ContradictionScan,
        link: bool,
    ) -> Result<Vec<Contradiction>> {
        if scan.project.is_none() {
            let active = self.inner.context.project();
            if active != crate::project::GLOBAL_PROJECT {
                scan.project = Some(active);
            }
        }
        let results = self.inner.contradictions.detect_all(&scan)?;
        if link {
            self.inner.contradictions.link_all(&results)?;
        }
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Consolidation
    // ------------------------------------------------------------------

    /// Run (or preview) a consolidation pass.
    ///
    /// Without `force` the pass only runs when the store asks for it.
    /// A dry run classifies without writing and reports the counts.
    pub fn consolidate(&self, force: bool, dry_run: bool) -> Result<ConsolidationReport> {
        if !force && !self.inner.consolidator.should_trigger()? {
            return Ok(ConsolidationReport::default());
        }

        if dry_run {
            return Ok(self.preview_consolidation()?);
        }

        let report = self.inner.consolidator.consolidate()?;
        self.inner.bus.broadcast(EngineEvent::ConsolidationComplete {
            report: report.clone(),
            timestamp: Utc::now(),
        });
        Ok(report)
    }

    /// Classification-only preview of what consolidation would do
    fn preview_consolidation(&self) -> Result<ConsolidationReport> {
        let now = Utc::now();
        let pool = self.inner.store.bulk_select(
            &MemoryFilter {
                memory_type: Some(MemoryType::ShortTerm),
                ..Default::default()
            },
            MemoryOrder::Recency,
            self.inner.config.max_short_term_memories * 2,
            0,
        )?;

        let mut report = ConsolidationReport::default();
        for memory in &pool {
            match decay::classify(memory, now, &self.inner.config).0 {
                decay::DecayOutcome::Promote => report.consolidated += 1,
                decay::DecayOutcome::Delete => report.deleted += 1,
                decay::DecayOutcome::Update => report.decayed += 1,
            }
        }
        Ok(report)
    }

    /// Consolidate, merge near-duplicates, vacuum
    pub fn full_cleanup(&self) -> Result<ConsolidationReport> {
        Ok(self.inner.consolidator.full_cleanup()?)
    }

    /// Merge near-duplicate short-term memories for a project
    pub fn merge_similar(&self, project: Option<&str>) -> Result<i64> {
        Ok(self.inner.consolidator.merge_similar(project, MERGE_THRESHOLD)?)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Open an episodic session and make it current
    pub fn start_session(&self, project: Option<String>) -> Result<Session> {
        let project = project.or_else(|| {
            let active = self.inner.context.project();
            (active != crate::project::GLOBAL_PROJECT).then_some(active)
        });
        let session = Session::begin(project);
        self.inner.store.insert_session(&session)?;

        if let Ok(mut slot) = self.inner.session.lock() {
            *slot = Some(session.id.clone());
        }
        publish(
            &self.inner.store,
            &self.inner.bus,
            EngineEvent::SessionStarted {
                id: session.id.clone(),
                project: session.project.clone(),
                timestamp: session.started_at,
            },
        );
        Ok(session)
    }

    /// Close a session with an optional summary
    pub fn end_session(&self, id: &str, summary: Option<&str>) -> Result<Session> {
        let session = self
            .inner
            .store
            .end_session(id, summary)?
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;

        if let Ok(mut slot) = self.inner.session.lock() {
            if slot.as_deref() == Some(id) {
                *slot = None;
            }
        }
        publish(
            &self.inner.store,
            &self.inner.bus,
            EngineEvent::SessionEnded {
                id: session.id.clone(),
                summary: session.summary.clone(),
                timestamp: Utc::now(),
            },
        );
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Stats, export, import
    // ------------------------------------------------------------------

    /// Aggregate statistics, optionally scoped to one project
    pub fn get_stats(&self, project: Option<&str>) -> Result<MemoryStats> {
        let store = &self.inner.store;
        let base = MemoryFilter {
            project: project.map(|p| p.to_string()),
            ..Default::default()
        };

        let by_type = |memory_type| {
            store.count(&MemoryFilter {
                memory_type: Some(memory_type),
                ..base.clone()
            })
        };

        let all = store.bulk_select(&base, MemoryOrder::Created, usize::MAX >> 1, 0)?;
        let average_salience = if all.is_empty() {
            0.0
        } else {
            all.iter().map(|m| m.salience).sum::<f64>() / all.len() as f64
        };

        Ok(MemoryStats {
            total_memories: all.len() as i64,
            short_term: by_type(MemoryType::ShortTerm)?,
            long_term: by_type(MemoryType::LongTerm)?,
            episodic: by_type(MemoryType::Episodic)?,
            total_links: store.link_count()?,
            total_sessions: store.session_count()?,
            average_salience,
            memories_with_embeddings: store.embedding_count()?,
            oldest_memory: all.iter().map(|m| m.created_at).min(),
            newest_memory: all.iter().map(|m| m.created_at).max(),
            database_bytes: store.size_info().bytes,
        })
    }

    /// Export memories as a portable bundle
    pub fn export_memories(&self, project: Option<&str>) -> Result<MemoryExport> {
        let filter = MemoryFilter {
            project: project.map(|p| p.to_string()),
            ..Default::default()
        };
        let memories = self
            .inner
            .store
            .bulk_select(&filter, MemoryOrder::Created, usize::MAX >> 1, 0)?;

        Ok(MemoryExport {
            schema_version: EXPORT_SCHEMA_VERSION,
            project: project.map(|p| p.to_string()),
            exported_at: Utc::now(),
            memories: memories.iter().map(ExportedMemory::from).collect(),
        })
    }

    /// Import a bundle. The whole bundle is rejected on a schema-version
    /// mismatch or when any title already exists in its project.
    pub fn import_memories(&self, export: MemoryExport) -> Result<usize> {
        self.check_write_allowed()?;

        if export.schema_version != EXPORT_SCHEMA_VERSION {
            return Err(EngineError::ImportRejected(format!(
                "schema version {} does not match supported version {}",
                export.schema_version, EXPORT_SCHEMA_VERSION
            )));
        }

        // Duplicate probe before any insertion so imports are all-or-nothing
        for imported in &export.memories {
            let filter = MemoryFilter {
                project: imported.project.clone().or(Some("*".to_string())),
                ..Default::default()
            };
            let existing = self
                .inner
                .store
                .bulk_select(&filter, MemoryOrder::Created, usize::MAX >> 1, 0)?;
            if existing
                .iter()
                .any(|m| m.title == imported.title && m.project == imported.project)
            {
                return Err(EngineError::ImportRejected(format!(
                    "duplicate title '{}'",
                    imported.title
                )));
            }
        }

        let mut count = 0;
        for imported in &export.memories {
            let memory = self.inner.store.insert(NewMemory {
                memory_type: imported.memory_type,
                category: imported.category,
                title: imported.title.clone(),
                content: imported.content.clone(),
                project: imported.project.clone(),
                scope: imported.scope,
                transferable: imported.transferable,
                tags: imported.tags.clone(),
                salience: imported.salience,
                metadata: imported.metadata.clone(),
            })?;
            self.inner.bus.broadcast(EngineEvent::MemoryCreated {
                id: memory.id,
                title: memory.title.clone(),
                category: memory.category,
                memory_type: memory.memory_type,
                project: memory.project.clone(),
                tags: memory.tags.clone(),
                timestamp: memory.created_at,
            });
            count += 1;
        }
        Ok(count)
    }
}

// ============================================================================
// TESTS
// ============================================================================
