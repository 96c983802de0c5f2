use crate::{StoreError, StoreResult, CONFLICT_RETRY_SLEEP, MAX_CONFLICT_RETRIES};
use chrono::{DateTime, Utc};
use harvest_protocol::EntityDocument;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// The entity document store: get/create-on-write, conflict-retrying upsert,
/// and the stage-specific mutations the pipeline needs.
///
/// A namespace (one per source adapter) is created implicitly by `upsert`;
/// there is no separate "create database" step.
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl DocumentStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        DocumentStore { conn }
    }

    /// Fetch a document by namespace + id. Returns `None` if absent —
    /// mirrors `DatabaseHandler.get_document` swallowing `ResourceNotFound`.
    pub fn get(&self, namespace: &str, id: &str) -> StoreResult<Option<EntityDocument>> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, namespace, id)
    }

    fn get_locked(conn: &Connection, namespace: &str, id: &str) -> StoreResult<Option<EntityDocument>> {
        let row = conn
            .query_row(
                "SELECT id, doc_type, payload, update_date, update_count, serialized, sent,
                        class_id, variant_id, multi_result, rev
                 FROM documents WHERE namespace = ?1 AND id = ?2",
                params![namespace, id],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert or refresh a fetched document, per spec §4.G step 3.
    ///
    /// Stamps `type`, `_id`, `update_date`, bumps `update_count`, sets
    /// `serialized = false` (a freshly (re-)fetched document always needs
    /// re-serialization), and optionally stamps `multi_result`. Retries up
    /// to `MAX_CONFLICT_RETRIES` times on a write conflict, sleeping
    /// `CONFLICT_RETRY_SLEEP` between attempts, per spec §4.H.
    pub fn upsert(
        &self,
        namespace: &str,
        doc_type: &str,
        id: &str,
        payload: serde_json::Value,
        multi_result: Option<bool>,
    ) -> StoreResult<EntityDocument> {
        let payload_str = serde_json::to_string(&payload)?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        for attempt in 0..MAX_CONFLICT_RETRIES {
            let write = {
                let conn = self.conn.lock().unwrap();
                conn.execute(
                    "INSERT INTO documents
                         (namespace, id, doc_type, payload, update_date, update_count,
                          serialized, sent, class_id, variant_id, multi_result, rev)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, 0, NULL, NULL, ?6, 0)
                     ON CONFLICT(namespace, id) DO UPDATE SET
                         doc_type = excluded.doc_type,
                         payload = excluded.payload,
                         update_date = excluded.update_date,
                         update_count = documents.update_count + 1,
                         serialized = 0,
                         multi_result = excluded.multi_result,
                         rev = documents.rev + 1",
                    params![namespace, id, doc_type, payload_str, now_str, multi_result],
                )
            };

            match write {
                Ok(_) => {
                    let doc = Self::get_locked(&self.conn.lock().unwrap(), namespace, id)?
                        .expect("just upserted");
                    return Ok(doc);
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if matches!(
                        e.code,
                        rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                    ) =>
                {
                    tracing::warn!(namespace, id, attempt, "write conflict, retrying");
                    std::thread::sleep(CONFLICT_RETRY_SLEEP);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::ConflictExhausted {
            namespace: namespace.to_owned(),
            id: id.to_owned(),
        })
    }

    /// SerializeTag stage: no-op if already serialized, else stamps
    /// class/variant ids and flips `serialized = true`, `sent = false`.
    pub fn mark_serialized(
        &self,
        namespace: &str,
        id: &str,
        class_id: i64,
        variant_id: i64,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let doc = Self::get_locked(&conn, namespace, id)?;
        let Some(doc) = doc else {
            return Ok(false);
        };
        if doc.serialized {
            return Ok(false);
        }
        conn.execute(
            "UPDATE documents SET class_id = ?1, variant_id = ?2, serialized = 1, sent = 0, rev = rev + 1
             WHERE namespace = ?3 AND id = ?4",
            params![class_id, variant_id, namespace, id],
        )?;
        Ok(true)
    }

    /// Compress stage: returns `false` (no-op) if already sent.
    pub fn is_sent(&self, namespace: &str, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        Ok(Self::get_locked(&conn, namespace, id)?
            .map(|d| d.sent)
            .unwrap_or(false))
    }

    /// Send stage: stamp `sent = true` after a successful delivery.
    pub fn mark_sent(&self, namespace: &str, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE documents SET sent = 1, rev = rev + 1 WHERE namespace = ?1 AND id = ?2",
            params![namespace, id],
        )?;
        Ok(())
    }

    /// All distinct namespaces currently populated — used by recovery to
    /// iterate "every database in the document store".
    pub fn namespaces(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT namespace FROM documents ORDER BY namespace")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All documents in a namespace with `sent != true` — recovery's
    /// work-list.
    pub fn unsent(&self, namespace: &str) -> StoreResult<Vec<EntityDocument>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, doc_type, payload, update_date, update_count, serialized, sent,
                    class_id, variant_id, multi_result, rev
             FROM documents WHERE namespace = ?1 AND sent = 0 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![namespace], map_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityDocument> {
    let payload_str: String = row.get(2)?;
    let payload: serde_json::Value = serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null);
    let update_date_str: Option<String> = row.get(3)?;
    let update_date: Option<DateTime<Utc>> = update_date_str
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc));

    Ok(EntityDocument {
        id: row.get(0)?,
        doc_type: row.get(1)?,
        payload,
        update_date,
        update_count: row.get(4)?,
        serialized: row.get::<_, i64>(5)? != 0,
        sent: row.get::<_, i64>(6)? != 0,
        class_id: row.get(7)?,
        variant_id: row.get(8)?,
        multi_result: row.get::<_, Option<i64>>(9)?.map(|v| v != 0),
        rev: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn upsert_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let doc = store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({"name": "Alice"}), None)
            .unwrap();
        assert_eq!(doc.update_count, 1);
        assert!(!doc.serialized);

        let fetched = store.documents.get("authors", "a1").unwrap().unwrap();
        assert_eq!(fetched.payload["name"], "Alice");
    }

    #[test]
    fn upsert_twice_bumps_update_count_and_resets_serialized() {
        let store = Store::open_in_memory().unwrap();
        store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({"v": 1}), None)
            .unwrap();
        store.documents.mark_serialized("authors", "a1", 1000, 0).unwrap();

        let doc = store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({"v": 2}), None)
            .unwrap();
        assert_eq!(doc.update_count, 2);
        assert!(!doc.serialized);
    }

    #[test]
    fn mark_serialized_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({}), None)
            .unwrap();
        assert!(store.documents.mark_serialized("authors", "a1", 1000, 0).unwrap());
        assert!(!store.documents.mark_serialized("authors", "a1", 1000, 0).unwrap());
    }

    #[test]
    fn mark_sent_then_unsent_excludes_it() {
        let store = Store::open_in_memory().unwrap();
        store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({}), None)
            .unwrap();
        store
            .documents
            .upsert("authors", "authors", "a2", serde_json::json!({}), None)
            .unwrap();
        store.documents.mark_sent("authors", "a1").unwrap();

        let unsent = store.documents.unsent("authors").unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, "a2");
    }

    #[test]
    fn namespaces_lists_distinct_namespaces() {
        let store = Store::open_in_memory().unwrap();
        store
            .documents
            .upsert("authors", "authors", "a1", serde_json::json!({}), None)
            .unwrap();
        store
            .documents
            .upsert("journals", "journals", "j1", serde_json::json!({}), None)
            .unwrap();
        let mut ns = store.documents.namespaces().unwrap();
        ns.sort();
        assert_eq!(ns, vec!["authors".to_string(), "journals".to_string()]);
    }
}
