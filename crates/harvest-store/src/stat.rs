use crate::StoreResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// Small counters and cursors that aren't entity documents in their own
/// right: message-id sequence numbers, the Scraper Queue's last-update
/// bookkeeping, the Scimago paginator's cursor, and the politeness
/// controller's ban flag.
///
/// The message-id counter is durable so a restart never reuses an id that
/// was already handed out.
pub struct StatStore {
    conn: Arc<Mutex<Connection>>,
}

impl StatStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        StatStore { conn }
    }

    /// Atomically increment and return the next id for `message_type`,
    /// starting from 1.
    pub fn next_message_id(&self, message_type: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message_counters (message_type, counter) VALUES (?1, 1)
             ON CONFLICT(message_type) DO UPDATE SET counter = counter + 1",
            params![message_type],
        )?;
        let counter: i64 = conn.query_row(
            "SELECT counter FROM message_counters WHERE message_type = ?1",
            params![message_type],
            |row| row.get(0),
        )?;
        Ok(counter)
    }

    /// Last-update index and timestamp recorded for a given content kind
    /// (e.g. `"authors"`, `"publications"`), used by the Scraper Queue to
    /// resume a scan where it left off.
    pub fn content_update(&self, content: &str) -> StoreResult<Option<(i64, DateTime<Utc>)>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT last_index, last_update_iso FROM content_updates WHERE content = ?1",
                params![content],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(idx, iso)| {
            DateTime::parse_from_rfc3339(&iso)
                .ok()
                .map(|dt| (idx, dt.with_timezone(&Utc)))
        }))
    }

    pub fn set_content_update(&self, content: &str, last_index: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO content_updates (content, last_index, last_update_iso) VALUES (?1, ?2, ?3)
             ON CONFLICT(content) DO UPDATE SET last_index = excluded.last_index,
                                                 last_update_iso = excluded.last_update_iso",
            params![content, last_index, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// The next unfetched Scimago ranking page for a given year.
    pub fn scimago_cursor(&self, year: i32) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let page: Option<i64> = conn
            .query_row(
                "SELECT page FROM scimago_cursors WHERE year = ?1",
                params![year],
                |row| row.get(0),
            )
            .optional()?;
        Ok(page.unwrap_or(0))
    }

    pub fn set_scimago_cursor(&self, year: i32, page: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scimago_cursors (year, page) VALUES (?1, ?2)
             ON CONFLICT(year) DO UPDATE SET page = excluded.page",
            params![year, page],
        )?;
        Ok(())
    }

    /// Whether the last request observed a ban phrase, per spec §4.C.
    pub fn was_banned(&self) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let flag: Option<i64> = conn
            .query_row("SELECT was_banned FROM ban_state WHERE id = 0", [], |row| row.get(0))
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    pub fn set_was_banned(&self, banned: bool) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ban_state (id, was_banned) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET was_banned = excluded.was_banned",
            params![banned as i64],
        )?;
        Ok(())
    }
}
