//! Shared SQLite handle for the bronze/silver/estimate stores.
//!
//! Key choices:
//! - WAL mode for concurrent reads during batch writes
//! - Prepared statement caching on hot queries
//! - Per-record transactions so concurrent passes converge (last writer wins)
//! - No row limits; the bronze layer is an append-only audit surface

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

/// Schema for the three persisted layers plus the ingest audit trail.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;

-- Bronze: raw payloads exactly as collected, keyed by (source, natural key).
-- Immutable except processed/processing_error; re-ingestion of a changed
-- payload updates in place and resets processed.
CREATE TABLE IF NOT EXISTS raw_records (
    source TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    lineage_id TEXT NOT NULL,
    signature TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    processing_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (source, natural_key)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_raw_unprocessed
    ON raw_records(processed, updated_at) WHERE processed = 0;

CREATE INDEX IF NOT EXISTS idx_raw_lineage
    ON raw_records(lineage_id);

-- Append-only ingest audit trail: one row per accepted ingest call.
CREATE TABLE IF NOT EXISTS ingest_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lineage_id TEXT NOT NULL,
    source TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    signature TEXT NOT NULL,
    outcome TEXT NOT NULL,
    at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_key
    ON ingest_audit(source, natural_key, at DESC);

-- Silver: standardized per-entity records, one row per (entity, period, source).
-- A pure function of the raw record; never hand-edited.
CREATE TABLE IF NOT EXISTS standardized_records (
    entity_key TEXT NOT NULL,
    period TEXT NOT NULL,
    source TEXT NOT NULL,
    metrics_json TEXT NOT NULL,
    quality_flag TEXT NOT NULL,
    lineage_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (entity_key, period, source)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_std_period
    ON standardized_records(period, entity_key);

-- Estimate version chain: append-only, exactly one current row per
-- (commodity, period); the flip happens inside one transaction.
CREATE TABLE IF NOT EXISTS estimates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    commodity TEXT NOT NULL,
    period TEXT NOT NULL,
    line_items_json TEXT NOT NULL,
    as_of_date TEXT NOT NULL,
    notes TEXT,
    is_current INTEGER NOT NULL DEFAULT 0,
    loaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_estimates_current
    ON estimates(commodity, period, is_current);
"#;

/// Cloneable handle to the pipeline database.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the pipeline database and apply schema + pragmas.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // we handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();

        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let raw_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM raw_records", [], |row| row.get(0))
            .unwrap_or(0);

        info!(path = db_path, raw_records = raw_count, "database ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Lock the connection for the duration of one statement or transaction.
    ///
    /// Callers must not hold the guard across an await point.
    pub fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}
