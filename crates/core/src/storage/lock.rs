use crate::domain::record::DocumentKey;
use anyhow::Context;
use chrono::Datelike;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-document write serialization inside one process.
///
/// Hold the guard across the whole read-merge-encode-write-invalidate sequence for a key.
/// Different keys never contend.
#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<DocumentKey, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: DocumentKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on so the map tracks live keys only.
            locks.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
            locks.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

// Advisory locks are scoped to the Postgres session. The worker takes one per date as a
// best-effort guard against a second worker writing the same document concurrently.
const LOCK_NAMESPACE: i64 = 0x4D4B_544C_4F47; // "MKTLOG"

fn lock_key_for_date(date: DocumentKey) -> i64 {
    LOCK_NAMESPACE ^ (date.num_days_from_ce() as i64)
}

pub async fn try_acquire_document_lock(
    pool: &sqlx::PgPool,
    date: DocumentKey,
) -> anyhow::Result<bool> {
    let key = lock_key_for_date(date);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_document_lock(pool: &sqlx::PgPool, date: DocumentKey) -> anyhow::Result<()> {
    let key = lock_key_for_date(date);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn day(d: u32) -> DocumentKey {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(DocumentLocks::new());
        let guard = locks.lock(day(27)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(day(27)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = DocumentLocks::new();
        let _a = locks.lock(day(27)).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(day(28))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = DocumentLocks::new();
        drop(locks.lock(day(26)).await);
        drop(locks.lock(day(27)).await);
        let _held = locks.lock(day(28)).await;
        assert_eq!(locks.len().await, 1);
    }

    #[test]
    fn advisory_keys_differ_per_date() {
        assert_ne!(lock_key_for_date(day(27)), lock_key_for_date(day(28)));
    }
}
