//! Document store and stat store for the harvester.
//!
//! Both live in a single SQLite file, following a one-file, WAL-mode,
//! integrity-checked-at-open convention (`storage/journal.rs`). The document
//! store stands in for a CouchDB-backed `DatabaseHandler`: one logical
//! namespace per source adapter (`authors`, `publications`, `journals`,
//! `conferences`), modeled here as a `namespace` column rather than one
//! physical database per adapter.

mod stat;
mod store;

pub use stat::StatStore;
pub use store::DocumentStore;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("write conflict exhausted retries for {namespace}/{id}")]
    ConflictExhausted { namespace: String, id: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Sleep between conflict retries, per spec §4.H.
pub(crate) const CONFLICT_RETRY_SLEEP: Duration = Duration::from_secs(5);
pub(crate) const MAX_CONFLICT_RETRIES: u32 = 3;

pub(crate) fn apply_pragmas(conn: &rusqlite::Connection) -> StoreResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA wal_autocheckpoint=1000;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

pub(crate) fn run_integrity_check(conn: &rusqlite::Connection) -> StoreResult<()> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

pub(crate) fn apply_schema(conn: &rusqlite::Connection) -> StoreResult<()> {
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(())
}

/// A single handle owning the SQLite connection, shared by the document
/// store and stat store halves of the API. Construction of a second handle
/// over the same path from the same process is a programming error — callers
/// share one `Arc<Store>` instead.
pub struct Store {
    pub documents: DocumentStore,
    pub stats: StatStore,
}

impl Store {
    pub fn open(path: &std::path::Path) -> StoreResult<Self> {
        let conn = rusqlite::Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        apply_schema(&conn)?;
        let conn = std::sync::Arc::new(std::sync::Mutex::new(conn));
        Ok(Store {
            documents: DocumentStore::new(conn.clone()),
            stats: StatStore::new(conn),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        let conn = std::sync::Arc::new(std::sync::Mutex::new(conn));
        Ok(Store {
            documents: DocumentStore::new(conn.clone()),
            stats: StatStore::new(conn),
        })
    }
}
