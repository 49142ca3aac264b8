//! Storage Layer
//!
//! Durable persistence for memories, links, sessions, and the durable
//! event queue. Single-writer/multi-reader SQLite in WAL mode.

pub mod migrations;
mod sqlite;

pub use sqlite::{
    default_data_dir, default_db_path, FieldPatch, MemoryFilter, MemoryOrder, MemoryStore,
    NewMemory, Result, SizeInfo, StorageError, TRUNCATION_MARKER,
};

pub(crate) use sqlite::{persist_event_tx, row_to_memory};
