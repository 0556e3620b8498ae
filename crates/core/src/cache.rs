//! Read-through TTL cache of decoded trading-day records.

use crate::document::decode_document;
use crate::domain::record::{DocumentKey, TradingDayRecord};
use crate::error::Result;
use crate::storage::DocumentStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    record: TradingDayRecord,
    /// `None` when the TTL is too large to represent as an instant; such entries live until
    /// invalidated.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn fresh(&self, now: Instant) -> Option<&TradingDayRecord> {
        self.is_live(now).then_some(&self.record)
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Maps a document key to its decoded record.
///
/// Hits share the read lock; a miss decodes under the write lock so concurrent misses for
/// the same key hit storage once. A TTL of zero disables caching and every read decodes
/// from storage.
///
/// Owned by the service and independent of any other cache: invalidating here does not
/// touch, say, a rendered-page cache.
#[derive(Clone)]
pub struct DocumentCache {
    inner: Arc<tokio::sync::RwLock<HashMap<DocumentKey, CacheEntry>>>,
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl DocumentCache {
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            store,
            ttl,
        }
    }

    pub fn disabled(store: Arc<dyn DocumentStore>) -> Self {
        Self::new(store, Duration::ZERO)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_disabled(&self) -> bool {
        self.ttl.is_zero()
    }

    /// Returns the cached record, or reads and decodes it from storage on miss or expiry.
    ///
    /// Storage and decode errors propagate; nothing is cached for a failed load.
    pub async fn get_or_decode(&self, key: DocumentKey) -> Result<TradingDayRecord> {
        if self.is_disabled() {
            return self.load(key).await;
        }

        {
            let map = self.inner.read().await;
            if let Some(record) = map.get(&key).and_then(|e| e.fresh(Instant::now())) {
                return Ok(record.clone());
            }
        }

        let mut map = self.inner.write().await;
        if let Some(record) = map.get(&key).and_then(|e| e.fresh(Instant::now())) {
            return Ok(record.clone());
        }

        let record = self.load(key).await?;
        map.insert(
            key,
            CacheEntry {
                record: record.clone(),
                expires_at: self.expiry(),
            },
        );
        tracing::debug!(%key, "document cache filled");
        Ok(record)
    }

    /// Warms the cache with a record that was just written.
    pub async fn put(&self, key: DocumentKey, record: TradingDayRecord) {
        if self.is_disabled() {
            return;
        }
        let mut map = self.inner.write().await;
        map.insert(
            key,
            CacheEntry {
                record,
                expires_at: self.expiry(),
            },
        );
    }

    pub async fn invalidate(&self, key: DocumentKey) {
        let mut map = self.inner.write().await;
        if map.remove(&key).is_some() {
            tracing::debug!(%key, "document cache invalidated");
        }
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.inner
            .write()
            .await
            .retain(|_, entry| entry.is_live(now));
    }

    /// Number of entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    fn expiry(&self) -> Option<Instant> {
        Instant::now().checked_add(self.ttl)
    }

    async fn load(&self, key: DocumentKey) -> Result<TradingDayRecord> {
        let text = self.store.read_document(key).await?;
        let mut record = decode_document(&text)?;
        match record.date {
            None => record.date = Some(key),
            Some(date) if date != key => {
                tracing::warn!(%key, title_date = %date, "document title date differs from its key");
            }
            Some(_) => {}
        }
        Ok(record)
    }
}
