use crate::domain::record::DocumentKey;
use crate::error::Result;
use anyhow::Context;

pub mod fs;
pub mod lock;
pub mod memory;
pub mod metadata;

pub use fs::FsDocumentStore;
pub use lock::DocumentLocks;
pub use memory::MemoryDocumentStore;

/// Source of truth for document text. Writes replace the whole document.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// `Error::NotFound` when nothing has been written for `key` yet.
    async fn read_document(&self, key: DocumentKey) -> Result<String>;

    async fn write_document(&self, key: DocumentKey, text: &str) -> Result<()>;
}

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
