//! An on-disk `Store` backed by a `tempfile` directory, for tests that need
//! to exercise the real SQLite file (WAL mode, integrity check on open)
//! rather than `Store::open_in_memory`.

use harvest_store::{Store, StoreError};
use tempfile::TempDir;

/// Owns the temp directory alongside the `Store` so the directory is not
/// deleted out from under an open connection.
pub struct TempStore {
    _dir: TempDir,
    pub store: Store,
}

impl TempStore {
    pub fn new() -> Result<Self, StoreError> {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("harvest.sqlite3");
        let store = Store::open(&path)?;
        Ok(TempStore { _dir: dir, store })
    }
}
