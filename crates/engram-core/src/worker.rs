//! Background worker loop
//!
//! One cooperative tokio task, two cadences:
//!
//! - **Light tick** (~30 s): prune the activation cache, recompute decayed
//!   scores for recently accessed memories, consolidate when the store
//!   asks for it.
//! - **Medium tick** (every tenth light tick, ~5 min): discover new links
//!   and contradictions over a bounded window, garbage-collect delivered
//!   events.
//!
//! Shutdown is a watch channel: no new ticks start after the signal, the
//! in-flight tick runs to completion, then the task exits.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::activation::ActivationCache;
use crate::config::{
    EngineConfig, EVENT_RETENTION, FULL_CLEANUP_INTERVAL, LIGHT_TICK_INTERVAL,
    MEDIUM_TICK_INTERVAL,
};
use crate::consolidation::Consolidator;
use crate::contradiction::{ContradictionDetector, ContradictionScan};
use crate::events::{publish, EngineEvent, EventBus};
use crate::links::LinkEngine;
use crate::storage::{MemoryFilter, MemoryOrder, MemoryStore};

/// Memories re-scored on every light tick
const DECAY_SCAN_LIMIT: usize = 200;

/// Light ticks between score persistence + WAL checkpoints
const PERSIST_EVERY: u64 = 10;

/// Window of recently touched memories scanned for new links
const LINK_SCAN_LIMIT: usize = 50;

/// Contradiction results considered per medium tick
const CONTRADICTION_SCAN_LIMIT: usize = 20;

/// Handle to the running worker
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the in-flight tick to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Worker task ended abnormally: {}", e);
        }
    }
}

/// Spawn the worker onto the current tokio runtime
pub fn spawn(
    store: Arc<MemoryStore>,
    config: EngineConfig,
    bus: EventBus,
    activation: Arc<Mutex<ActivationCache>>,
) -> WorkerHandle {
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(run(store, config, bus, activation, rx));
    WorkerHandle { shutdown, handle }
}

async fn run(
    store: Arc<MemoryStore>,
    config: EngineConfig,
    bus: EventBus,
    activation: Arc<Mutex<ActivationCache>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let consolidator = Consolidator::new(store.clone(), config.clone());
    let links = LinkEngine::new(store.clone());
    let contradictions = ContradictionDetector::new(store.clone());

    let mut interval = tokio::time::interval(LIGHT_TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let medium_every = (MEDIUM_TICK_INTERVAL.as_secs() / LIGHT_TICK_INTERVAL.as_secs()).max(1);
    let cleanup_every =
        (FULL_CLEANUP_INTERVAL.as_secs() / LIGHT_TICK_INTERVAL.as_secs()).max(1);

    let mut tick: u64 = 0;
    let mut pending_changes: Vec<crate::events::DecayChange> = Vec::new();

    tracing::info!("Worker started");
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        tick += 1;

        light_tick(&store, &bus, &activation, &consolidator, &mut pending_changes);

        if tick % PERSIST_EVERY == 0 {
            if let Err(e) = consolidator.persist_decay_changes(&pending_changes) {
                tracing::warn!("Persisting decay scores failed: {}", e);
            }
            pending_changes.clear();
            if let Err(e) = store.checkpoint_wal() {
                tracing::warn!("WAL checkpoint failed: {}", e);
            }
        }

        if tick % medium_every == 0 {
            medium_tick(&store, &bus, &links, &contradictions, &consolidator);
        }

        if tick % cleanup_every == 0 {
            if let Err(e) = consolidator.full_cleanup() {
                tracing::warn!("Full cleanup failed: {}", e);
            }
        }
    }
    tracing::info!("Worker stopped");
}

/// Activation pruning, decay recomputation, trigger-driven consolidation
fn light_tick(
    store: &Arc<MemoryStore>,
    bus: &EventBus,
    activation: &Arc<Mutex<ActivationCache>>,
    consolidator: &Consolidator,
    pending_changes: &mut Vec<crate::events::DecayChange>,
) {
    let now = Utc::now();

    let pruned = activation
        .lock()
        .map(|mut cache| cache.prune(now))
        .unwrap_or(0);

    match consolidator.compute_decay_changes(DECAY_SCAN_LIMIT) {
        Ok(changes) if !changes.is_empty() => {
            // Later recomputations supersede earlier pending ones
            pending_changes.retain(|p| !changes.iter().any(|c| c.id == p.id));
            pending_changes.extend(changes.iter().cloned());
            publish(
                store,
                bus,
                EngineEvent::DecayTick {
                    changes,
                    timestamp: now,
                },
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Decay recomputation failed: {}", e),
    }

    match consolidator.should_trigger() {
        Ok(true) => match consolidator.consolidate() {
            Ok(report) => bus.broadcast(EngineEvent::ConsolidationComplete {
                report,
                timestamp: Utc::now(),
            }),
            Err(e) => tracing::warn!("Triggered consolidation failed: {}", e),
        },
        Ok(false) => {}
        Err(e) => tracing::warn!("Consolidation trigger check failed: {}", e),
    }

    publish(
        store,
        bus,
        EngineEvent::WorkerLightTick {
            activation_pruned: pruned,
            timestamp: now,
        },
    );
}

/// Link discovery, contradiction scan, event queue GC
fn medium_tick(
    store: &Arc<MemoryStore>,
    bus: &EventBus,
    links: &LinkEngine,
    contradictions: &ContradictionDetector,
    consolidator: &Consolidator,
) {
    let now = Utc::now();
    let mut links_discovered = 0_usize;
    let mut contradictions_found = 0_usize;

    // Scan the recently touched window for missing edges
    match store.bulk_select(&MemoryFilter::default(), MemoryOrder::Recency, LINK_SCAN_LIMIT, 0)
    {
        Ok(window) => {
            for memory in window {
                match links.auto_link(&memory) {
                    Ok(created) => {
                        links_discovered += created.len();
                        for link in created {
                            publish(
                                store,
                                bus,
                                EngineEvent::LinkDiscovered {
                                    source_id: link.source_id,
                                    target_id: link.target_id,
                                    relationship: link.relationship,
                                    strength: link.strength,
                                    timestamp: now,
                                },
                            );
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Link scan failed for {}: {}", memory.id, e);
                    }
                }
            }
        }
        Err(e) => tracing::warn!("Link window selection failed: {}", e),
    }

    // Contradiction sweep over the same neighborhood
    let scan = ContradictionScan {
        limit: CONTRADICTION_SCAN_LIMIT,
        ..Default::default()
    };
    match contradictions.detect_all(&scan) {
        Ok(results) => {
            contradictions_found = results.len();
            if let Err(e) = contradictions.link_all(&results) {
                tracing::warn!("Contradiction linking failed: {}", e);
            }
        }
        Err(e) => tracing::warn!("Contradiction scan failed: {}", e),
    }

    // Predictive consolidation: act before the store fills up
    if let Ok(true) = consolidator.should_trigger() {
        match consolidator.consolidate() {
            Ok(report) => {
                bus.broadcast(EngineEvent::ConsolidationComplete {
                    report,
                    timestamp: Utc::now(),
                });
                publish(
                    store,
                    bus,
                    EngineEvent::PredictiveConsolidation {
                        reason: "short-term store approaching capacity".to_string(),
                        timestamp: Utc::now(),
                    },
                );
            }
            Err(e) => tracing::warn!("Predictive consolidation failed: {}", e),
        }
    }

    // Delivered events older than the retention window are gone
    let cutoff = now
        - chrono::Duration::from_std(EVENT_RETENTION)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
    if let Err(e) = store.prune_processed_events(cutoff) {
        tracing::warn!("Event queue GC failed: {}", e);
    }

    publish(
        store,
        bus,
        EngineEvent::WorkerMediumTick {
            links_discovered,
            contradictions_found,
            timestamp: now,
        },
    );
}

// ============================================================================
// TESTS
// ============================================================================
