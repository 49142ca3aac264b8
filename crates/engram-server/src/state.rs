//! Shared server state

use std::time::Instant;

use engram_core::MemoryEngine;

/// Application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: MemoryEngine,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: MemoryEngine) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }
}
