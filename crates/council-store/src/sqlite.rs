use std::path::Path;

use chrono::Utc;
use council_models::store_schema::{RecordCategory, RecordRow, RECORD_TABLE_DDL};
use rusqlite::Connection;

use crate::error::StoreError;

/// Read-write SQLite record table.
///
/// File-backed stores run in WAL mode so an external quote feed can write
/// while sessions read.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`. `:memory:` opens a
    /// private in-memory database.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if path == ":memory:" {
            return Self::open_in_memory();
        }
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(RECORD_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(RECORD_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Insert or replace the record at `key`. `created_at` survives updates.
    pub fn put(
        &self,
        key: &str,
        category: RecordCategory,
        value_json: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO records (key, category, value_json, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4) \
             ON CONFLICT(key) DO UPDATE SET \
             category = excluded.category, \
             value_json = excluded.value_json, \
             updated_at = excluded.updated_at",
            rusqlite::params![key, category.as_str(), value_json, now],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<RecordRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT key, category, value_json, created_at, updated_at \
             FROM records WHERE key = ?1",
        )?;

        let result = stmt.query_row(rusqlite::params![key], |row| {
            Ok(RecordRow {
                key: row.get(0)?,
                category: row.get(1)?,
                value_json: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        });

        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM records WHERE key = ?1", rusqlite::params![key])?;
        Ok(removed > 0)
    }

    pub fn count(&self, category: RecordCategory) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE category = ?1",
            rusqlite::params![category.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}
