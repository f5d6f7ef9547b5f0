use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use council_models::config::StoreConfig;
use council_models::store_schema::{key_patterns, RecordCategory};
use council_models::{AnalysisResult, MarketSnapshot, Strategy};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::memory::MemoryCache;
use crate::sqlite::SqliteStore;

/// Point-lookup record store: moka (hot) in front of SQLite (durable).
///
/// Writes go to SQLite first and then refresh the hot copy; reads check
/// moka, fall back to SQLite and promote hits.
///
/// SQLite access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
pub struct RecordStore {
    memory: MemoryCache,
    sqlite: Mutex<SqliteStore>,
}

impl RecordStore {
    pub fn new(sqlite: SqliteStore, max_capacity: u64, memory_ttl: Duration) -> Self {
        Self {
            memory: MemoryCache::new(max_capacity, memory_ttl),
            sqlite: Mutex::new(sqlite),
        }
    }

    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let sqlite = SqliteStore::open(&config.sqlite_path)?;
        Ok(Self::new(
            sqlite,
            config.memory_max_capacity,
            Duration::from_secs(config.memory_ttl_seconds),
        ))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(
            SqliteStore::open_in_memory()?,
            1_000,
            Duration::from_secs(300),
        ))
    }

    fn sqlite(&self) -> Result<MutexGuard<'_, SqliteStore>, StoreError> {
        self.sqlite
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        category: RecordCategory,
        value: &T,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        self.sqlite()?.put(key, category, &json)?;
        self.memory.insert(key.to_string(), category, json).await;
        debug!(key, category = category.as_str(), "Record stored");
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        if let Some(json) = self.memory.get(key).await {
            return Ok(Some(serde_json::from_str(&json)?));
        }

        let row = self.sqlite()?.get(key)?;
        match row {
            Some(row) => {
                let value = serde_json::from_str(&row.value_json)?;
                match RecordCategory::parse(&row.category) {
                    Some(category) => {
                        self.memory
                            .insert(key.to_string(), category, row.value_json)
                            .await
                    }
                    None => debug!(key, category = %row.category, "Unknown category, not cached"),
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self.sqlite()?.delete(key)?;
        self.memory.invalidate(key).await;
        Ok(removed)
    }

    pub fn count(&self, category: RecordCategory) -> Result<u64, StoreError> {
        self.sqlite()?.count(category)
    }

    pub async fn save_result(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        self.put(
            &key_patterns::session(result.session_id),
            RecordCategory::Session,
            result,
        )
        .await
    }

    pub async fn load_result(&self, session_id: Uuid) -> Result<Option<AnalysisResult>, StoreError> {
        self.get(&key_patterns::session(session_id)).await
    }

    pub async fn save_strategy(&self, strategy: &Strategy) -> Result<(), StoreError> {
        self.put(
            &key_patterns::strategy(strategy.id),
            RecordCategory::Strategy,
            strategy,
        )
        .await
    }

    pub async fn load_strategy(&self, id: Uuid) -> Result<Option<Strategy>, StoreError> {
        self.get(&key_patterns::strategy(id)).await
    }

    pub async fn put_quote(&self, snapshot: &MarketSnapshot) -> Result<(), StoreError> {
        self.put(
            &key_patterns::quote(&snapshot.symbol),
            RecordCategory::Quote,
            snapshot,
        )
        .await
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<Option<MarketSnapshot>, StoreError> {
        self.get(&key_patterns::quote(symbol)).await
    }
}
