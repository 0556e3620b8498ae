use crate::domain::record::DocumentKey;
use crate::error::{Error, Result};
use crate::storage::DocumentStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: tokio::sync::Mutex<HashMap<DocumentKey, String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: DocumentKey, text: impl Into<String>) {
        self.docs.lock().await.insert(key, text.into());
    }

    pub async fn remove(&self, key: DocumentKey) -> Option<String> {
        self.docs.lock().await.remove(&key)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_document(&self, key: DocumentKey) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.docs
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or(Error::NotFound(key))
    }

    async fn write_document(&self, key: DocumentKey, text: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.docs.lock().await.insert(key, text.to_string());
        Ok(())
    }
}
