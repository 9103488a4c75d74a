//! Durable analytics table on SQLite.
//!
//! # Synchronization
//!
//! The connection lives behind `Arc<Mutex<Connection>>`. Every method holds
//! the lock for its whole statement or transaction and never across an
//! `.await`; the methods are synchronous and are called from
//! `spawn_blocking` by the delivery engine.
//!
//! # Claims
//!
//! A claim is one conditional `UPDATE`, so two runs with different claim ids
//! can never take the same row: a row pending under another non-null
//! `process_id` fails the `WHERE` clause.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};

use super::entry::{AnalyticEntry, EntryState};
use crate::error::StoreError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS analytics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    content TEXT NOT NULL,
    state INTEGER NOT NULL,
    meta_data TEXT NULL,
    process_id TEXT NULL,
    version TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analytics_state ON analytics(state);
CREATE INDEX IF NOT EXISTS idx_analytics_type ON analytics(type);
CREATE INDEX IF NOT EXISTS idx_analytics_process_id ON analytics(process_id);
";

const SELECT_COLUMNS: &str = "id, type, content, state, meta_data, process_id, version";

/// Handle to the analytics table. Clones share the connection.
#[derive(Debug, Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if `SQLite` initialization fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        let recovered = store.recover_stale()?;
        if recovered > 0 {
            tracing::info!(recovered, "released analytics rows left claimed by a previous process");
        }
        Ok(store)
    }

    /// Releases rows still claimed when the database was last closed.
    ///
    /// Claims do not survive a restart: pending and in-progress rows go back
    /// to [`EntryState::DeliveryFailed`] with no claim id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub fn recover_stale(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE analytics SET state = ?1, process_id = NULL WHERE state IN (?2, ?3)",
            params![
                EntryState::DeliveryFailed.as_i64(),
                EntryState::DeliveryPending.as_i64(),
                EntryState::DeliveryInProgress.as_i64(),
            ],
        )?;
        Ok(changed)
    }

    /// Inserts a new row in [`EntryState::New`] and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub fn insert(
        &self,
        entry_type: &str,
        content: &str,
        metadata: Option<&str>,
        version: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO analytics (type, content, state, meta_data, process_id, version)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![
                entry_type,
                content,
                EntryState::New.as_i64(),
                metadata,
                version
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Claims up to `limit` rows of `entry_type` for `process_id`.
    ///
    /// Eligible rows are new, failed, or pending with no claim id or this
    /// claim id. Rows in progress or pending under another claim are skipped.
    /// Returns the number of rows now pending under `process_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub fn claim(
        &self,
        entry_type: &str,
        process_id: &str,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE analytics SET state = ?1, process_id = ?2
             WHERE id IN (
                 SELECT id FROM analytics
                 WHERE type = ?3
                   AND (state IN (?4, ?5)
                        OR (state = ?1 AND (process_id IS NULL OR process_id = ?2)))
                 ORDER BY id
                 LIMIT ?6
             )",
            params![
                EntryState::DeliveryPending.as_i64(),
                process_id,
                entry_type,
                EntryState::New.as_i64(),
                EntryState::DeliveryFailed.as_i64(),
                to_sql_limit(limit),
            ],
        )?;
        Ok(changed)
    }

    /// Takes the next page of rows pending under `process_id` and marks them
    /// [`EntryState::DeliveryInProgress`] in the same transaction.
    ///
    /// Returns an empty vector once the claim is drained.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query or update fails.
    pub fn take_page(
        &self,
        entry_type: &str,
        process_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalyticEntry>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut entries = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM analytics
                 WHERE type = ?1 AND state = ?2 AND process_id = ?3
                 ORDER BY id LIMIT ?4"
            ))?;
            let rows = stmt.query_map(
                params![
                    entry_type,
                    EntryState::DeliveryPending.as_i64(),
                    process_id,
                    to_sql_limit(limit)
                ],
                row_to_entry,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        {
            let mut mark = tx.prepare("UPDATE analytics SET state = ?1 WHERE id = ?2")?;
            for entry in &mut entries {
                mark.execute(params![EntryState::DeliveryInProgress.as_i64(), entry.id])?;
                entry.state = EntryState::DeliveryInProgress;
            }
        }
        tx.commit()?;
        Ok(entries)
    }

    /// Deletes delivered rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub fn delete(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM analytics WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Marks rows [`EntryState::DeliveryFailed`] and clears their claim id,
    /// making them eligible for the next claim.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub fn mark_failed(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE analytics SET state = ?1, process_id = NULL WHERE id = ?2")?;
            for id in ids {
                changed += stmt.execute(params![EntryState::DeliveryFailed.as_i64(), id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Returns one row by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn get(&self, id: i64) -> Result<Option<AnalyticEntry>, StoreError> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM analytics WHERE id = ?1"),
                params![id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Returns every row of `entry_type` ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn entries(&self, entry_type: &str) -> Result<Vec<AnalyticEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM analytics WHERE type = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![entry_type], row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::MutexPoisoned(format!("{e}")))
    }
}

#[allow(clippy::cast_possible_wrap)]
const fn to_sql_limit(limit: usize) -> i64 {
    limit as i64
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnalyticEntry> {
    let raw_state: i64 = row.get(3)?;
    let state = EntryState::from_i64(raw_state).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Integer,
            format!("unknown analytics state {raw_state}").into(),
        )
    })?;
    Ok(AnalyticEntry {
        id: row.get(0)?,
        entry_type: row.get(1)?,
        content: row.get(2)?,
        state,
        metadata: row.get(4)?,
        process_id: row.get(5)?,
        version: row.get(6)?,
    })
}
