use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{SessionStore, StoredSubscription};
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sess (cid TEXT NOT NULL, sub_id TEXT NOT NULL, filter TEXT NOT NULL);
CREATE UNIQUE INDEX IF NOT EXISTS sess_key ON sess (cid, sub_id);
CREATE TABLE IF NOT EXISTS events (cid TEXT NOT NULL, sub_id TEXT NOT NULL, eid TEXT NOT NULL);
CREATE UNIQUE INDEX IF NOT EXISTS events_key ON events (cid, sub_id, eid);
CREATE TABLE IF NOT EXISTS recent_events (cid TEXT NOT NULL, data TEXT NOT NULL);
CREATE INDEX IF NOT EXISTS recent_events_cid ON recent_events (cid);
";

/// Session tables in SQLite. File-backed stores keep dedup history across
/// restarts.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(%mode, "sqlite journal mode");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

impl SessionStore for SqliteStore {
    fn insert_subscription(
        &mut self,
        client_id: &str,
        key: &str,
        filters: &[Value],
    ) -> Result<(), StoreError> {
        let filter = serde_json::to_string(filters)?;
        self.conn.execute(
            "INSERT INTO sess (cid, sub_id, filter) VALUES (?1, ?2, ?3)
             ON CONFLICT (cid, sub_id) DO UPDATE SET filter = excluded.filter",
            params![client_id, key, filter],
        )?;
        Ok(())
    }

    fn has_subscription(&self, client_id: &str, key: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sess WHERE cid = ?1 AND sub_id = ?2",
                params![client_id, key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn remove_subscription(&mut self, client_id: &str, key: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM sess WHERE cid = ?1 AND sub_id = ?2",
            params![client_id, key],
        )?;
        tx.execute(
            "DELETE FROM events WHERE cid = ?1 AND sub_id = ?2",
            params![client_id, key],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn client_subscriptions(&self, client_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT sub_id FROM sess WHERE cid = ?1 ORDER BY rowid")?;
        let keys = stmt
            .query_map(params![client_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn subscriptions(&self) -> Result<Vec<StoredSubscription>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT cid, sub_id, filter FROM sess ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(client_id, key, filter)| -> Result<_, StoreError> {
                Ok(StoredSubscription {
                    client_id,
                    key,
                    filters: serde_json::from_str(&filter)?,
                })
            })
            .collect()
    }

    fn mark_delivered(
        &mut self,
        client_id: &str,
        key: &str,
        event_id: &str,
    ) -> Result<bool, StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO events (cid, sub_id, eid) VALUES (?1, ?2, ?3)",
            params![client_id, key, event_id],
        )?;
        Ok(inserted == 1)
    }

    fn push_recent_write(&mut self, client_id: &str, frame: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO recent_events (cid, data) VALUES (?1, ?2)",
            params![client_id, frame],
        )?;
        Ok(())
    }

    fn recent_writes(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT data FROM recent_events ORDER BY rowid")?;
        let frames = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(frames)
    }

    fn remove_client(&mut self, client_id: &str) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM sess WHERE cid = ?1", params![client_id])?;
        tx.execute("DELETE FROM events WHERE cid = ?1", params![client_id])?;
        tx.execute("DELETE FROM recent_events WHERE cid = ?1", params![client_id])?;
        tx.commit()?;
        Ok(())
    }
}
