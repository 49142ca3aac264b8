//! SQLite Storage Implementation
//!
//! Single-writer/multi-reader storage with an FTS5 content-shadow index,
//! a durable event queue, and cascade-deleting graph edges. All row to
//! domain conversion happens here; nothing outside this module sees raw
//! rows.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::{SIZE_BLOCKED_BYTES, SIZE_WARNING_BYTES};
use crate::embeddings::Embedding;
use crate::events::{EngineEvent, StoredEvent};
use crate::memory::{
    Category, Memory, MemoryLink, MemoryType, Relationship, Scope, Session,
};
use crate::search::sanitize_fts_query;

/// Marker appended to content cut at the size limit
pub const TRUNCATION_MARKER: &str = "… [truncated]";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Memory not found
    #[error("Memory not found: {0}")]
    NotFound(i64),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
    /// Writes rejected: database over the hard size cap
    #[error("Storage blocked: {0}")]
    Blocked(String),
    /// The query could not be compiled into an FTS expression
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// PATHS
// ============================================================================

/// Platform data directory for the engine
pub fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "engram", "engram") {
        return proj_dirs.data_dir().to_path_buf();
    }
    PathBuf::from(".engram")
}

/// Default database path.
///
/// New installations live under the platform data directory; a legacy
/// `~/.engram/engram.db` is honored when it already exists.
pub fn default_db_path() -> PathBuf {
    if let Some(base) = directories::BaseDirs::new() {
        let legacy = base.home_dir().join(".engram").join("engram.db");
        if legacy.exists() {
            return legacy;
        }
    }
    default_data_dir().join("engram.db")
}

// ============================================================================
// INPUT / FILTER TYPES
// ============================================================================

/// A fully resolved memory ready for insertion. The engine fills in
/// everything the caller left to the salience scorer.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub memory_type: MemoryType,
    pub category: Category,
    pub title: String,
    pub content: String,
    pub project: Option<String>,
    pub scope: Scope,
    pub transferable: bool,
    pub tags: Vec<String>,
    pub salience: f64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Atomic multi-field update. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct FieldPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub category: Option<Category>,
    pub project: Option<Option<String>>,
    pub scope: Option<Scope>,
    pub transferable: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub salience: Option<f64>,
    pub decayed_score: Option<f64>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl FieldPatch {
    /// Names of the fields this patch touches, for the update event
    pub fn field_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.title.is_some() {
            names.push("title".into());
        }
        if self.content.is_some() {
            names.push("content".into());
        }
        if self.memory_type.is_some() {
            names.push("memory_type".into());
        }
        if self.category.is_some() {
            names.push("category".into());
        }
        if self.project.is_some() {
            names.push("project".into());
        }
        if self.scope.is_some() {
            names.push("scope".into());
        }
        if self.transferable.is_some() {
            names.push("transferable".into());
        }
        if self.tags.is_some() {
            names.push("tags".into());
        }
        if self.salience.is_some() {
            names.push("salience".into());
        }
        if self.decayed_score.is_some() {
            names.push("decayed_score".into());
        }
        if self.last_accessed.is_some() {
            names.push("last_accessed".into());
        }
        if self.metadata.is_some() {
            names.push("metadata".into());
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }
}

/// Row filter shared by selection, counting, and search
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Restrict to one project; global and transferable memories always
    /// pass. `None` means no project filtering.
    pub project: Option<String>,
    pub category: Option<Category>,
    pub memory_type: Option<MemoryType>,
    /// Every listed tag must be present (JSON-array membership)
    pub tags: Vec<String>,
    pub min_salience: Option<f64>,
}

impl MemoryFilter {
    /// Build the WHERE fragment and its parameters. `m` aliases memories.
    fn where_clause(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(project) = &self.project {
            if project != "*" {
                clauses.push(
                    "(m.project = ? OR m.scope = 'global' OR m.transferable = 1)".to_string(),
                );
                params.push(Box::new(project.clone()));
            }
        }
        if let Some(category) = self.category {
            clauses.push("m.category = ?".to_string());
            params.push(Box::new(category.as_str()));
        }
        if let Some(memory_type) = self.memory_type {
            clauses.push("m.memory_type = ?".to_string());
            params.push(Box::new(memory_type.as_str()));
        }
        if let Some(min) = self.min_salience {
            clauses.push("m.salience >= ?".to_string());
            params.push(Box::new(min));
        }
        for tag in &self.tags {
            clauses.push(
                "EXISTS (SELECT 1 FROM json_each(m.tags) WHERE json_each.value = ?)".to_string(),
            );
            params.push(Box::new(tag.clone()));
        }

        if clauses.is_empty() {
            ("1=1".to_string(), params)
        } else {
            (clauses.join(" AND "), params)
        }
    }
}

/// Ordering for bulk selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryOrder {
    #[default]
    Recency,
    Salience,
    DecayedScore,
    Created,
}

impl MemoryOrder {
    fn sql(&self) -> &'static str {
        match self {
            MemoryOrder::Recency => "m.last_accessed DESC",
            MemoryOrder::Salience => "m.salience DESC",
            MemoryOrder::DecayedScore => "COALESCE(m.decayed_score, m.salience) DESC",
            MemoryOrder::Created => "m.created_at DESC",
        }
    }
}

/// Database size report
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeInfo {
    pub bytes: u64,
    pub warning: bool,
    pub blocked: bool,
    pub message: String,
}

// ============================================================================
// STORE
// ============================================================================

/// Shared SELECT head so every query resolves the embedding flag the same way
const SELECT_MEMORY: &str = "SELECT m.*, \
    EXISTS(SELECT 1 FROM memory_embeddings e WHERE e.memory_id = m.id) AS has_embedding \
    FROM memories m";

/// Main storage struct.
///
/// Separate reader/writer connections give interior mutability; all methods
/// take `&self`, making the store `Send + Sync` behind an `Arc`.
pub struct MemoryStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    db_path: PathBuf,
    max_content_bytes: usize,
}

impl MemoryStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 10000;
             PRAGMA journal_size_limit = 67108864;",
        )?;
        Ok(())
    }

    /// Open (or create) the database and run migrations
    pub fn open(db_path: Option<PathBuf>, max_content_bytes: usize) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let path = default_db_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                path
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            db_path: path,
            max_content_bytes,
        })
    }

    /// Database file path
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("Writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("Reader lock poisoned".into()))
    }

    // ------------------------------------------------------------------
    // Lock file
    // ------------------------------------------------------------------

    /// Path of the advisory lock file next to the database
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .db_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engram.db".to_string());
        name.push_str(".lock");
        self.db_path.with_file_name(name)
    }

    /// Write `<pid>\n<iso-timestamp>` next to the database. Advisory only.
    pub fn write_lock_file(&self) -> Result<()> {
        let contents = format!("{}\n{}", std::process::id(), Utc::now().to_rfc3339());
        std::fs::write(self.lock_path(), contents)?;
        Ok(())
    }

    /// Remove the advisory lock file; missing files are fine
    pub fn remove_lock_file(&self) {
        if let Err(e) = std::fs::remove_file(self.lock_path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove lock file: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Size gate
    // ------------------------------------------------------------------

    /// Current database size (main file + WAL) and gate flags
    pub fn size_info(&self) -> SizeInfo {
        let mut bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        let wal = self.db_path.with_extension("db-wal");
        bytes += std::fs::metadata(wal).map(|m| m.len()).unwrap_or(0);

        let warning = bytes > SIZE_WARNING_BYTES;
        let blocked = bytes > SIZE_BLOCKED_BYTES;
        let message = if blocked {
            format!(
                "database is {} MiB, over the {} MiB hard cap; writes are blocked",
                bytes / (1024 * 1024),
                SIZE_BLOCKED_BYTES / (1024 * 1024)
            )
        } else if warning {
            format!(
                "database is {} MiB, approaching the {} MiB cap",
                bytes / (1024 * 1024),
                SIZE_BLOCKED_BYTES / (1024 * 1024)
            )
        } else {
            "database size is healthy".to_string()
        };

        SizeInfo {
            bytes,
            warning,
            blocked,
            message,
        }
    }

    /// Whether writes are currently rejected
    pub fn is_blocked(&self) -> bool {
        self.size_info().blocked
    }

    fn check_writable(&self) -> Result<()> {
        let info = self.size_info();
        if info.blocked {
            return Err(StorageError::Blocked(info.message));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run `f` inside a deferred transaction; any error rolls back.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside an immediate transaction: the write lock is taken
    /// eagerly so long passes do not get starved mid-way.
    pub fn with_immediate_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Checkpoint the WAL; returns checkpointed pages
    pub fn checkpoint_wal(&self) -> Result<i64> {
        let conn = self.writer()?;
        let (_busy, _log, checkpointed): (i64, i64, i64) = conn.query_row(
            "PRAGMA wal_checkpoint(TRUNCATE)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(checkpointed)
    }

    /// Reclaim free pages
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.writer()?;
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Memory CRUD
    // ------------------------------------------------------------------

    /// Truncate content at the byte limit, appending the visible marker
    fn bound_content(&self, content: &str) -> String {
        if content.len() <= self.max_content_bytes {
            return content.to_string();
        }
        let mut end = self.max_content_bytes;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        let mut bounded = content[..end].to_string();
        bounded.push_str(TRUNCATION_MARKER);
        bounded
    }

    /// Insert a memory. The FTS index is updated synchronously by trigger
    /// and a `memory_created` event lands in the durable queue within the
    /// same transaction.
    pub fn insert(&self, new: NewMemory) -> Result<Memory> {
        self.check_writable()?;
        let now = Utc::now();
        let content = self.bound_content(&new.content);
        let tags_json = serde_json::to_string(&new.tags).unwrap_or_else(|_| "[]".to_string());
        let metadata_json =
            serde_json::to_string(&new.metadata).unwrap_or_else(|_| "{}".to_string());
        let salience = new.salience.clamp(0.0, 1.0);

        let id = self.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO memories (
                    memory_type, category, title, content, project, tags,
                    salience, decayed_score, access_count, last_accessed,
                    created_at, metadata, scope, transferable
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, ?13)",
                params![
                    new.memory_type.as_str(),
                    new.category.as_str(),
                    new.title,
                    content,
                    new.project,
                    tags_json,
                    salience,
                    salience,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    metadata_json,
                    new.scope.as_str(),
                    new.transferable as i64,
                ],
            )?;
            let id = tx.last_insert_rowid();

            let event = EngineEvent::MemoryCreated {
                id,
                title: new.title.clone(),
                category: new.category,
                memory_type: new.memory_type,
                project: new.project.clone(),
                tags: new.tags.clone(),
                timestamp: now,
            };
            persist_event_tx(tx, &event)?;
            Ok(id)
        })?;

        self.get(id)?.ok_or(StorageError::NotFound(id))
    }

    /// Atomically update the named fields; persists a `memory_updated`
    /// event in the same transaction.
    pub fn update_fields(&self, id: i64, patch: &FieldPatch) -> Result<Memory> {
        self.check_writable()?;
        if patch.is_empty() {
            return self.get(id)?.ok_or(StorageError::NotFound(id));
        }

        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(title) = &patch.title {
            sets.push("title = ?".into());
            values.push(Box::new(title.clone()));
        }
        if let Some(content) = &patch.content {
            sets.push("content = ?".into());
            values.push(Box::new(self.bound_content(content)));
        }
        if let Some(memory_type) = patch.memory_type {
            sets.push("memory_type = ?".into());
            values.push(Box::new(memory_type.as_str()));
        }
        if let Some(category) = patch.category {
            sets.push("category = ?".into());
            values.push(Box::new(category.as_str()));
        }
        if let Some(project) = &patch.project {
            sets.push("project = ?".into());
            values.push(Box::new(project.clone()));
        }
        if let Some(scope) = patch.scope {
            sets.push("scope = ?".into());
            values.push(Box::new(scope.as_str()));
        }
        if let Some(transferable) = patch.transferable {
            sets.push("transferable = ?".into());
            values.push(Box::new(transferable as i64));
        }
        if let Some(tags) = &patch.tags {
            sets.push("tags = ?".into());
            values.push(Box::new(
                serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()),
            ));
        }
        if let Some(salience) = patch.salience {
            sets.push("salience = ?".into());
            values.push(Box::new(salience.clamp(0.0, 1.0)));
        }
        if let Some(decayed) = patch.decayed_score {
            sets.push("decayed_score = ?".into());
            values.push(Box::new(decayed.clamp(0.0, 1.0)));
        }
        if let Some(last_accessed) = patch.last_accessed {
            sets.push("last_accessed = ?".into());
            values.push(Box::new(last_accessed.to_rfc3339()));
        }
        if let Some(metadata) = &patch.metadata {
            sets.push("metadata = ?".into());
            values.push(Box::new(
                serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string()),
            ));
        }

        let sql = format!("UPDATE memories SET {} WHERE id = ?", sets.join(", "));
        values.push(Box::new(id));
        let fields = patch.field_names();

        self.with_transaction(|tx| {
            let changed = tx.execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))?;
            if changed == 0 {
                return Err(StorageError::NotFound(id));
            }
            let event = EngineEvent::MemoryUpdated {
                id,
                fields,
                timestamp: Utc::now(),
            };
            persist_event_tx(tx, &event)?;
            Ok(())
        })?;

        self.get(id)?.ok_or(StorageError::NotFound(id))
    }

    /// Update `last_accessed` only, persisting a `memory_accessed` event.
    /// Never touches salience; this is the soft-access path used by search.
    pub fn touch(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.with_transaction(|tx| {
            let changed = tx.execute(
                "UPDATE memories SET last_accessed = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), id],
            )?;
            if changed == 0 {
                return Err(StorageError::NotFound(id));
            }
            let access_count: i64 = tx.query_row(
                "SELECT access_count FROM memories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            persist_event_tx(
                tx,
                &EngineEvent::MemoryAccessed {
                    id,
                    access_count,
                    timestamp: now,
                },
            )?;
            Ok(())
        })
    }

    /// Full reinforcing access: bump the counter, move `last_accessed`,
    /// and persist the new salience and decayed score.
    pub fn record_access(
        &self,
        id: i64,
        now: DateTime<Utc>,
        salience: f64,
        decayed_score: f64,
    ) -> Result<Memory> {
        self.check_writable()?;
        self.with_transaction(|tx| {
            let changed = tx.execute(
                "UPDATE memories SET
                    access_count = access_count + 1,
                    last_accessed = ?1,
                    salience = ?2,
                    decayed_score = ?3
                 WHERE id = ?4",
                params![
                    now.to_rfc3339(),
                    salience.clamp(0.0, 1.0),
                    decayed_score.clamp(0.0, 1.0),
                    id
                ],
            )?;
            if changed == 0 {
                return Err(StorageError::NotFound(id));
            }
            let access_count: i64 = tx.query_row(
                "SELECT access_count FROM memories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            persist_event_tx(
                tx,
                &EngineEvent::MemoryAccessed {
                    id,
                    access_count,
                    timestamp: now,
                },
            )?;
            Ok(())
        })?;
        self.get(id)?.ok_or(StorageError::NotFound(id))
    }

    /// Persist a freshly computed decayed score, clamped to the salience
    /// invariant. Emits nothing; the decay tick batches its own event.
    pub fn update_decayed_score(&self, id: i64, decayed: f64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE memories SET decayed_score = MIN(?1, salience) WHERE id = ?2",
            params![decayed.clamp(0.0, 1.0), id],
        )?;
        Ok(())
    }

    /// Delete a memory; links cascade and a `memory_deleted` event with a
    /// title snapshot is persisted in the same transaction.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let title: Option<String> = {
            let reader = self.reader()?;
            reader
                .query_row(
                    "SELECT title FROM memories WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?
        };
        let Some(title) = title else {
            return Ok(false);
        };

        self.with_transaction(|tx| {
            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            persist_event_tx(
                tx,
                &EngineEvent::MemoryDeleted {
                    id,
                    title,
                    timestamp: Utc::now(),
                },
            )?;
            Ok(())
        })?;
        Ok(true)
    }

    /// Fetch one memory
    pub fn get(&self, id: i64) -> Result<Option<Memory>> {
        let reader = self.reader()?;
        let sql = format!("{SELECT_MEMORY} WHERE m.id = ?1");
        let mut stmt = reader.prepare(&sql)?;
        let memory = stmt.query_row(params![id], row_to_memory).optional()?;
        Ok(memory)
    }

    /// Filtered, ordered, paged selection
    pub fn bulk_select(
        &self,
        filter: &MemoryFilter,
        order: MemoryOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let (where_clause, mut values) = filter.where_clause();
        let sql = format!(
            "{SELECT_MEMORY} WHERE {where_clause} ORDER BY {} LIMIT ? OFFSET ?",
            order.sql()
        );
        values.push(Box::new(limit as i64));
        values.push(Box::new(offset as i64));

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(values.iter().map(|v| v.as_ref())),
            row_to_memory,
        )?;

        let mut memories = Vec::new();
        for row in rows {
            memories.push(row?);
        }
        Ok(memories)
    }

    /// Count memories matching a filter
    pub fn count(&self, filter: &MemoryFilter) -> Result<i64> {
        let (where_clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM memories m WHERE {where_clause}");
        let reader = self.reader()?;
        let count = reader.query_row(
            &sql,
            params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Full-text search joined with the base table and filters.
    ///
    /// Returns `(memory, fts_rank)` pairs; rank is BM25-style (lower is
    /// better, typically negative). The query is sanitized so FTS operators
    /// are matched literally.
    pub fn full_text_search(
        &self,
        query: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<(Memory, f64)>> {
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        self.fts_match(&sanitized, filter, limit)
    }

    /// Match any of the pre-cleaned alphanumeric tokens (OR semantics).
    /// Relationship detection uses this to cast a wide candidate net.
    pub(crate) fn fts_search_any(
        &self,
        tokens: &[String],
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<(Memory, f64)>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let expr = tokens
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.fts_match(&expr, filter, limit)
    }

    /// Run a pre-built MATCH expression. The search pipeline composes its
    /// own prefix-matching expression; everything else goes through
    /// [`MemoryStore::full_text_search`].
    pub(crate) fn fts_search_expr(
        &self,
        match_expr: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<(Memory, f64)>> {
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        self.fts_match(match_expr, filter, limit)
    }

    /// Shared MATCH runner for the sanitized and token-OR entry points
    fn fts_match(
        &self,
        match_expr: &str,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<(Memory, f64)>> {
        let (where_clause, mut values) = filter.where_clause();
        let sql = format!(
            "SELECT m.*, \
             EXISTS(SELECT 1 FROM memory_embeddings e WHERE e.memory_id = m.id) AS has_embedding, \
             memories_fts.rank AS fts_rank \
             FROM memories m \
             JOIN memories_fts ON m.id = memories_fts.rowid \
             WHERE memories_fts MATCH ? AND {where_clause} \
             ORDER BY memories_fts.rank LIMIT ?"
        );

        let mut all_values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_expr.to_string())];
        all_values.append(&mut values);
        all_values.push(Box::new(limit as i64));

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(all_values.iter().map(|v| v.as_ref())),
            |row| {
                let memory = row_to_memory(row)?;
                let rank: f64 = row.get("fts_rank")?;
                Ok((memory, rank))
            },
        );

        let rows = match rows {
            Ok(rows) => rows,
            // A MATCH parse failure after sanitizing is a malformed query
            Err(rusqlite::Error::SqliteFailure(e, msg)) => {
                return Err(StorageError::InvalidQuery(
                    msg.unwrap_or_else(|| e.to_string()),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        for row in rows {
            match row {
                Ok(pair) => results.push(pair),
                Err(rusqlite::Error::SqliteFailure(e, msg)) => {
                    return Err(StorageError::InvalidQuery(
                        msg.unwrap_or_else(|| e.to_string()),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(results)
    }

    /// The `limit` most recently accessed memories
    pub fn recently_accessed(&self, limit: usize) -> Result<Vec<Memory>> {
        self.bulk_select(&MemoryFilter::default(), MemoryOrder::Recency, limit, 0)
    }

    /// Ids of memories accessed within the trailing window, excluding one
    pub fn accessed_within(
        &self,
        window: chrono::Duration,
        exclude: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let cutoff = (now - window).to_rfc3339();
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id FROM memories WHERE last_accessed >= ?1 AND id != ?2",
        )?;
        let rows = stmt.query_map(params![cutoff, exclude], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Embeddings
    // ------------------------------------------------------------------

    /// Store (or replace) the embedding for a memory
    pub fn put_embedding(&self, memory_id: i64, embedding: &Embedding, model: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO memory_embeddings
                (memory_id, embedding, dimensions, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                memory_id,
                embedding.to_bytes(),
                embedding.dimensions() as i64,
                model,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch the embedding for a memory
    pub fn get_embedding(&self, memory_id: i64) -> Result<Option<Embedding>> {
        let reader = self.reader()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM memory_embeddings WHERE memory_id = ?1",
                params![memory_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.and_then(|b| Embedding::from_bytes(&b)))
    }

    /// Embeddings of memories matching the filter, highest decayed score
    /// first, bounded. This is the linear-scan candidate set for vector
    /// ranking.
    pub fn embeddings_matching(
        &self,
        filter: &MemoryFilter,
        limit: usize,
    ) -> Result<Vec<(i64, Embedding)>> {
        let (where_clause, mut values) = filter.where_clause();
        let sql = format!(
            "SELECT m.id, e.embedding \
             FROM memories m JOIN memory_embeddings e ON e.memory_id = m.id \
             WHERE {where_clause} \
             ORDER BY COALESCE(m.decayed_score, m.salience) DESC LIMIT ?"
        );
        values.push(Box::new(limit as i64));

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| {
                let id: i64 = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, bytes))
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            let (id, bytes) = row?;
            if let Some(embedding) = Embedding::from_bytes(&bytes) {
                results.push((id, embedding));
            }
        }
        Ok(results)
    }

    /// Count of memories carrying an embedding
    pub fn embedding_count(&self) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row("SELECT COUNT(*) FROM memory_embeddings", [], |row| row.get(0))?)
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Create a link. Self-links return `None`; both endpoints must exist;
    /// repeated creation with the same endpoints is a no-op returning the
    /// existing link.
    pub fn create_link(
        &self,
        source_id: i64,
        target_id: i64,
        relationship: Relationship,
        strength: f64,
    ) -> Result<Option<MemoryLink>> {
        if source_id == target_id {
            return Ok(None);
        }
        for id in [source_id, target_id] {
            if self.get(id)?.is_none() {
                return Err(StorageError::NotFound(id));
            }
        }

        let strength = strength.clamp(f64::MIN_POSITIVE, 1.0);
        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR IGNORE INTO memory_links
                    (source_id, target_id, relationship, strength, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    source_id,
                    target_id,
                    relationship.as_str(),
                    strength,
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }
        self.link_from(source_id, target_id)
    }

    /// The directed link from `source` to `target`, if any
    pub fn link_from(&self, source_id: i64, target_id: i64) -> Result<Option<MemoryLink>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM memory_links WHERE source_id = ?1 AND target_id = ?2",
        )?;
        let link = stmt
            .query_row(params![source_id, target_id], row_to_link)
            .optional()?;
        Ok(link)
    }

    /// A link between the pair in either direction, if any
    pub fn link_between(&self, a: i64, b: i64) -> Result<Option<MemoryLink>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM memory_links
             WHERE (source_id = ?1 AND target_id = ?2)
                OR (source_id = ?2 AND target_id = ?1)",
        )?;
        let link = stmt.query_row(params![a, b], row_to_link).optional()?;
        Ok(link)
    }

    /// All links incident to a memory, both directions
    pub fn links_for(&self, memory_id: i64) -> Result<Vec<MemoryLink>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM memory_links WHERE source_id = ?1 OR target_id = ?1",
        )?;
        let rows = stmt.query_map(params![memory_id], row_to_link)?;
        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    /// All links of one relationship kind
    pub fn links_by_relationship(&self, relationship: Relationship) -> Result<Vec<MemoryLink>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT * FROM memory_links WHERE relationship = ?1")?;
        let rows = stmt.query_map(params![relationship.as_str()], row_to_link)?;
        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    /// Overwrite a link's strength
    pub fn set_link_strength(&self, link_id: i64, strength: f64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE memory_links SET strength = ?1 WHERE id = ?2",
            params![strength.clamp(f64::MIN_POSITIVE, 1.0), link_id],
        )?;
        Ok(())
    }

    /// Remove a link between the pair in either direction
    pub fn delete_link_between(&self, a: i64, b: i64) -> Result<bool> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "DELETE FROM memory_links
             WHERE (source_id = ?1 AND target_id = ?2)
                OR (source_id = ?2 AND target_id = ?1)",
            params![a, b],
        )?;
        Ok(changed > 0)
    }

    /// Total number of links
    pub fn link_count(&self) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row("SELECT COUNT(*) FROM memory_links", [], |row| row.get(0))?)
    }

    // ------------------------------------------------------------------
    // Durable event queue
    // ------------------------------------------------------------------

    /// Persist an event row outside any transaction. Best-effort callers
    /// log and swallow the error.
    pub fn persist_event(&self, event: &EngineEvent) -> Result<i64> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO events (event_type, data, timestamp, processed)
             VALUES (?1, ?2, ?3, 0)",
            params![
                event.kind(),
                event.payload().to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(writer.last_insert_rowid())
    }

    /// Oldest-first unprocessed events for cross-process observers
    pub fn unprocessed_events(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, event_type, data, timestamp, processed
             FROM events WHERE processed = 0 ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Mark a batch of events as delivered
    pub fn mark_events_processed(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("UPDATE events SET processed = 1 WHERE id IN ({placeholders})");
        let writer = self.writer()?;
        let changed = writer.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(changed)
    }

    /// Garbage-collect processed events older than the cutoff
    pub fn prune_processed_events(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "DELETE FROM events WHERE processed = 1 AND timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Persist a new session row
    pub fn insert_session(&self, session: &Session) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO sessions
                (id, project, started_at, ended_at, summary,
                 memories_created, memories_accessed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.project,
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.summary,
                session.memories_created,
                session.memories_accessed,
            ],
        )?;
        Ok(())
    }

    /// Fetch one session
    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare("SELECT * FROM sessions WHERE id = ?1")?;
        let session = stmt.query_row(params![id], row_to_session).optional()?;
        Ok(session)
    }

    /// Close a session with an optional summary
    pub fn end_session(&self, id: &str, summary: Option<&str>) -> Result<Option<Session>> {
        {
            let writer = self.writer()?;
            writer.execute(
                "UPDATE sessions SET ended_at = ?1, summary = COALESCE(?2, summary)
                 WHERE id = ?3",
                params![Utc::now().to_rfc3339(), summary, id],
            )?;
        }
        self.get_session(id)
    }

    /// Add to a session's created/accessed counters
    pub fn bump_session_counters(&self, id: &str, created: i64, accessed: i64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE sessions SET
                memories_created = memories_created + ?1,
                memories_accessed = memories_accessed + ?2
             WHERE id = ?3",
            params![created, accessed, id],
        )?;
        Ok(())
    }

    /// Total number of sessions
    pub fn session_count(&self) -> Result<i64> {
        let reader = self.reader()?;
        Ok(reader.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?)
    }
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

/// Parse an RFC 3339 timestamp column
fn parse_timestamp(value: &str, field_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid {field_name} timestamp '{value}': {e}"),
                )),
            )
        })
}

/// The single memories-row to domain conversion
pub(crate) fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    let metadata_json: String = row.get("metadata")?;
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

    let memory_type: String = row.get("memory_type")?;
    let category: String = row.get("category")?;
    let scope: String = row.get("scope")?;

    let last_accessed: String = row.get("last_accessed")?;
    let created_at: String = row.get("created_at")?;

    let salience: f64 = row.get("salience")?;
    let decayed_score: Option<f64> = row.get("decayed_score")?;
    let has_embedding: i64 = row.get("has_embedding").unwrap_or(0);

    Ok(Memory {
        id: row.get("id")?,
        memory_type: MemoryType::parse_name(&memory_type),
        category: Category::parse_name(&category),
        title: row.get("title")?,
        content: row.get("content")?,
        project: row.get("project")?,
        scope: Scope::parse_name(&scope),
        transferable: row.get::<_, i64>("transferable")? != 0,
        tags,
        salience,
        decayed_score: decayed_score.unwrap_or(salience).min(salience),
        access_count: row.get("access_count")?,
        last_accessed: parse_timestamp(&last_accessed, "last_accessed")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        has_embedding: has_embedding != 0,
        metadata,
    })
}

fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<MemoryLink> {
    let relationship: String = row.get("relationship")?;
    let created_at: String = row.get("created_at")?;
    Ok(MemoryLink {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        relationship: Relationship::parse_name(&relationship),
        strength: row.get("strength")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    Ok(Session {
        id: row.get("id")?,
        project: row.get("project")?,
        started_at: parse_timestamp(&started_at, "started_at")?,
        ended_at: ended_at
            .map(|s| parse_timestamp(&s, "ended_at"))
            .transpose()?,
        summary: row.get("summary")?,
        memories_created: row.get("memories_created")?,
        memories_accessed: row.get("memories_accessed")?,
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<StoredEvent> {
    let data: String = row.get("data")?;
    let timestamp: String = row.get("timestamp")?;
    Ok(StoredEvent {
        id: row.get("id")?,
        event_type: row.get("event_type")?,
        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        timestamp: parse_timestamp(&timestamp, "timestamp")?,
        processed: row.get::<_, i64>("processed")? != 0,
    })
}

/// Persist an event row on an open transaction
pub(crate) fn persist_event_tx(tx: &Transaction, event: &EngineEvent) -> Result<()> {
    tx.execute(
        "INSERT INTO events (event_type, data, timestamp, processed)
         VALUES (?1, ?2, ?3, 0)",
        params![
            event.kind(),
            event.payload().to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (MemoryStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(Some(dir.path().join("test.db")), 10 * 1024).unwrap();
        (store, dir)
    }

    fn new_memory(title: &str, content: &str) -> NewMemory {
        NewMemory {
            memory_type: MemoryType::ShortTerm,
            category: Category::Note,
            title: title.to_string(),
            content: content.to_string(),
            project: Some("alpha".to_string()),
            scope: Scope::Project,
            transferable: false,
            tags: vec![],
            salience: 0.5,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let (store, _dir) = test_store();
        let memory = store.insert(new_memory("first", "the content")).unwrap();

        assert!(memory.id > 0);
        assert_eq!(memory.title, "first");
        assert_eq!(memory.access_count, 0);
        assert!(memory.decayed_score <= memory.salience);

        let fetched = store.get(memory.id).unwrap().unwrap();
        assert_eq!(fetched.title, memory.title);
        assert!(store.get(99_999).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let (store, _dir) = test_store();
        let first = store.insert(new_memory("a", "x")).unwrap();
        let second = store.insert(new_memory("b", "y")).unwrap();
        assert!(second.id > first.id);
    }

    #[test]
    fn test_oversize_content_truncated_with_marker() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(Some(dir.path().join("t.db")), 64).unwrap();
        let long = "x".repeat(200);
        let memory = store.insert(new_memory("big", &long)).unwrap();
        assert!(memory.content.len() <= 64 + TRUNCATION_MARKER.len());
        assert!(memory.content.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_insert_persists_created_event() {
        let (store, _dir) = test_store();
        store.insert(new_memory("evt", "content")).unwrap();
        let events = store.unprocessed_events(10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "memory_created");
        assert_eq!(events[0].data["title"], "evt");
    }

    #[test]
    fn test_update_fields_atomic() {
        let (store, _dir) = test_store();
        let memory = store.insert(new_memory("before", "body")).unwrap();

        let patch = FieldPatch {
            title: Some("after".into()),
            salience: Some(0.9),
            ..Default::default()
        };
        let updated = store.update_fields(memory.id, &patch).unwrap();
        assert_eq!(updated.title, "after");
        assert!((updated.salience - 0.9).abs() < 1e-9);

        let kinds: Vec<String> = store
            .unprocessed_events(10)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert!(kinds.contains(&"memory_updated".to_string()));
    }

    #[test]
    fn test_update_missing_memory_errors() {
        let (store, _dir) = test_store();
        let patch = FieldPatch {
            title: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_fields(12345, &patch),
            Err(StorageError::NotFound(12345))
        ));
    }

    #[test]
    fn test_delete_emits_event_with_title_snapshot() {
        let (store, _dir) = test_store();
        let memory = store.insert(new_memory("doomed", "body")).unwrap();
        assert!(store.delete(memory.id).unwrap());
        assert!(!store.delete(memory.id).unwrap());

        let deleted: Vec<StoredEvent> = store
            .unprocessed_events(10)
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == "memory_deleted")
            .collect();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].data["title"], "doomed");
    }

    #[test]
    fn test_cascade_removes_links() {
        let (store, _dir) = test_store();
        let a = store.insert(new_memory("a", "x")).unwrap();
        let b = store.insert(new_memory("b", "y")).unwrap();
        store
            .create_link(a.id, b.id, Relationship::Related, 0.5)
            .unwrap();
        assert_eq!(store.link_count().unwrap(), 1);

        store.delete(a.id).unwrap();
        assert_eq!(store.link_count().unwrap(), 0);
        assert!(store.links_for(b.id).unwrap().is_empty());
    }

    #[test]
    fn test_self_link_rejected() {
        let (store, _dir) = test_store();
        let a = store.insert(new_memory("a", "x")).unwrap();
        assert!(store
            .create_link(a.id, a.id, Relationship::Related, 0.5)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_link_creation_idempotent() {
        let (store, _dir) = test_store();
        let a = store.insert(new_memory("a", "x")).unwrap();
        let b = store.insert(new_memory("b", "y")).unwrap();

        let first = store
            .create_link(a.id, b.id, Relationship::Related, 0.5)
            .unwrap()
            .unwrap();
        let second = store
            .create_link(a.id, b.id, Relationship::Extends, 0.9)
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);
        // The original row wins
        assert_eq!(second.relationship, Relationship::Related);
        assert_eq!(store.link_count().unwrap(), 1);
    }

    #[test]
    fn test_link_requires_endpoints() {
        let (store, _dir) = test_store();
        let a = store.insert(new_memory("a", "x")).unwrap();
        assert!(matches!(
            store.create_link(a.id, 777, Relationship::Related, 0.5),
            Err(StorageError::NotFound(777))
        ));
    }

    #[test]
    fn test_link_between_is_direction_agnostic() {
        let (store, _dir) = test_store();
        let a = store.insert(new_memory("a", "x")).unwrap();
        let b = store.insert(new_memory("b", "y")).unwrap();
        store
            .create_link(a.id, b.id, Relationship::Related, 0.5)
            .unwrap();
        assert!(store.link_between(b.id, a.id).unwrap().is_some());
    }

    #[test]
    fn test_full_text_search_finds_stemmed_terms() {
        let (store, _dir) = test_store();
        store
            .insert(new_memory("Caching decision", "we cache aggressively"))
            .unwrap();
        store.insert(new_memory("unrelated", "nothing here")).unwrap();

        let results = store
            .full_text_search("caches", &MemoryFilter::default(), 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.title, "Caching decision");
    }

    #[test]
    fn test_full_text_search_survives_operators() {
        let (store, _dir) = test_store();
        store
            .insert(new_memory("ops", "migrate the database"))
            .unwrap();

        for query in [
            "database-migration",
            "a:b",
            "wild*",
            "caret^",
            "(parens)",
            "a & b | c",
            "file.ext",
            "AND OR NOT",
            "\"quoted\"",
        ] {
            // Must not error; operator characters are matched literally
            store
                .full_text_search(query, &MemoryFilter::default(), 10)
                .unwrap();
        }
    }

    #[test]
    fn test_filter_project_includes_global_and_transferable() {
        let (store, _dir) = test_store();
        store.insert(new_memory("mine", "alpha note")).unwrap();

        let mut other = new_memory("theirs", "beta note");
        other.project = Some("beta".into());
        store.insert(other).unwrap();

        let mut global = new_memory("shared", "global note");
        global.project = Some("beta".into());
        global.scope = Scope::Global;
        store.insert(global).unwrap();

        let filter = MemoryFilter {
            project: Some("alpha".into()),
            ..Default::default()
        };
        let titles: Vec<String> = store
            .bulk_select(&filter, MemoryOrder::Created, 10, 0)
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert!(titles.contains(&"mine".to_string()));
        assert!(titles.contains(&"shared".to_string()));
        assert!(!titles.contains(&"theirs".to_string()));
    }

    #[test]
    fn test_tag_filter_uses_membership_not_substring() {
        let (store, _dir) = test_store();
        let mut tagged = new_memory("tagged", "x");
        tagged.tags = vec!["auth".into()];
        store.insert(tagged).unwrap();

        let mut near_miss = new_memory("near", "y");
        near_miss.tags = vec!["author".into()];
        store.insert(near_miss).unwrap();

        let filter = MemoryFilter {
            tags: vec!["auth".into()],
            ..Default::default()
        };
        let results = store.bulk_select(&filter, MemoryOrder::Created, 10, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "tagged");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let (store, _dir) = test_store();
        store.insert(new_memory("keep", "x")).unwrap();
        let before = store.count(&MemoryFilter::default()).unwrap();

        let result: Result<()> = store.with_immediate_transaction(|tx| {
            tx.execute("DELETE FROM memories", [])?;
            Err(StorageError::Init("forced failure".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.count(&MemoryFilter::default()).unwrap(), before);
    }

    #[test]
    fn test_event_queue_lifecycle() {
        let (store, _dir) = test_store();
        let event = EngineEvent::ServerRestarting {
            timestamp: Utc::now(),
        };
        store.persist_event(&event).unwrap();

        let pending = store.unprocessed_events(10).unwrap();
        assert_eq!(pending.len(), 1);

        let ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
        assert_eq!(store.mark_events_processed(&ids).unwrap(), 1);
        assert!(store.unprocessed_events(10).unwrap().is_empty());

        // Already-processed rows older than the cutoff are collected
        let pruned = store
            .prune_processed_events(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(pruned, 1);
    }

    #[test]
    fn test_session_lifecycle() {
        let (store, _dir) = test_store();
        let session = Session::begin(Some("alpha".into()));
        store.insert_session(&session).unwrap();

        store.bump_session_counters(&session.id, 2, 5).unwrap();
        let ended = store
            .end_session(&session.id, Some("wrapped up"))
            .unwrap()
            .unwrap();
        assert_eq!(ended.memories_created, 2);
        assert_eq!(ended.memories_accessed, 5);
        assert!(ended.ended_at.is_some());
        assert_eq!(ended.summary.as_deref(), Some("wrapped up"));
    }

    #[test]
    fn test_embedding_roundtrip_and_flag() {
        let (store, _dir) = test_store();
        let memory = store.insert(new_memory("vec", "x")).unwrap();
        assert!(!memory.has_embedding);

        let embedding = Embedding::new(vec![0.6, 0.8]);
        store.put_embedding(memory.id, &embedding, "test").unwrap();

        let fetched = store.get(memory.id).unwrap().unwrap();
        assert!(fetched.has_embedding);
        assert_eq!(store.get_embedding(memory.id).unwrap().unwrap(), embedding);
        assert_eq!(store.embedding_count().unwrap(), 1);
    }

    #[test]
    fn test_size_info_healthy_for_small_db() {
        let (store, _dir) = test_store();
        store.insert(new_memory("small", "tiny")).unwrap();
        let info = store.size_info();
        assert!(info.bytes > 0);
        assert!(!info.warning);
        assert!(!info.blocked);
        assert!(!store.is_blocked());
    }

    #[test]
    fn test_lock_file_contents() {
        let (store, _dir) = test_store();
        store.write_lock_file().unwrap();
        let contents = std::fs::read_to_string(store.lock_path()).unwrap();
        let mut lines = contents.lines();
        let pid: u32 = lines.next().unwrap().parse().unwrap();
        assert_eq!(pid, std::process::id());
        assert!(lines.next().unwrap().contains('T'));
        store.remove_lock_file();
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn test_checkpoint_and_vacuum() {
        let (store, _dir) = test_store();
        for i in 0..20 {
            store.insert(new_memory(&format!("m{i}"), "filler")).unwrap();
        }
        store.checkpoint_wal().unwrap();
        store.vacuum().unwrap();
    }

    #[test]
    fn test_touch_updates_only_last_accessed() {
        let (store, _dir) = test_store();
        let memory = store.insert(new_memory("soft", "x")).unwrap();
        let later = Utc::now() + chrono::Duration::seconds(5);
        store.touch(memory.id, later).unwrap();

        let fetched = store.get(memory.id).unwrap().unwrap();
        assert_eq!(fetched.access_count, 0);
        assert!((fetched.salience - memory.salience).abs() < 1e-9);
        assert!(fetched.last_accessed > memory.last_accessed);
    }

    #[test]
    fn test_record_access_increments_counter() {
        let (store, _dir) = test_store();
        let memory = store.insert(new_memory("hit", "x")).unwrap();
        let updated = store
            .record_access(memory.id, Utc::now(), 0.8, 0.8)
            .unwrap();
        assert_eq!(updated.access_count, 1);
        assert!((updated.salience - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_accessed_within_window() {
        let (store, _dir) = test_store();
        let a = store.insert(new_memory("a", "x")).unwrap();
        let b = store.insert(new_memory("b", "y")).unwrap();

        let now = Utc::now();
        let ids = store
            .accessed_within(chrono::Duration::minutes(5), a.id, now)
            .unwrap();
        assert!(ids.contains(&b.id));
        assert!(!ids.contains(&a.id));
    }
}
