use std::sync::Arc;
use std::time::{Duration, Instant};

use council_models::RecordCategory;
use moka::future::Cache;
use moka::Expiry;

/// Quotes are rewritten by an external feed, so their hot copy stays short.
pub const QUOTE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CachedRecord {
    category: RecordCategory,
    json: Arc<str>,
}

/// Per-category time to live, restarted on every write.
struct CategoryExpiry {
    ttl: Duration,
    quote_ttl: Duration,
}

impl CategoryExpiry {
    fn ttl_for(&self, category: RecordCategory) -> Duration {
        match category {
            RecordCategory::Quote => self.quote_ttl,
            RecordCategory::Session | RecordCategory::Strategy => self.ttl,
        }
    }
}

impl Expiry<String, CachedRecord> for CategoryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedRecord,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.ttl_for(value.category))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedRecord,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.ttl_for(value.category))
    }
}

/// Hot copy of recently used records, keyed like the SQLite table.
///
/// Values stay raw JSON so the cache never has to know record types.
pub struct MemoryCache {
    inner: Cache<String, CachedRecord>,
}

impl MemoryCache {
    /// `ttl` applies to sessions and strategies; quotes use the shorter of
    /// `ttl` and [`QUOTE_TTL`].
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let expiry = CategoryExpiry {
            ttl,
            quote_ttl: ttl.min(QUOTE_TTL),
        };
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(expiry)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<str>> {
        self.inner.get(key).await.map(|record| record.json)
    }

    pub async fn insert(&self, key: String, category: RecordCategory, value_json: String) {
        let record = CachedRecord {
            category,
            json: value_json.into(),
        };
        self.inner.insert(key, record).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}
