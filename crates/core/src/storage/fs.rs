use crate::domain::record::DocumentKey;
use crate::error::{Error, Result};
use crate::storage::DocumentStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One `<root>/<YYYY-MM-DD>.md` file per trading day.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: DocumentKey) -> PathBuf {
        self.root.join(format!("{key}.md"))
    }
}

#[async_trait::async_trait]
impl DocumentStore for FsDocumentStore {
    async fn read_document(&self, key: DocumentKey) -> Result<String> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::NotFound(key)),
            Err(source) => Err(Error::Io { key, source }),
        }
    }

    async fn write_document(&self, key: DocumentKey, text: &str) -> Result<()> {
        let io = |source| Error::Io { key, source };

        tokio::fs::create_dir_all(&self.root).await.map_err(io)?;

        // Readers see either the old document or the new one, never a partial write.
        let path = self.path_for(key);
        let tmp = self.root.join(format!(".{key}.md.tmp"));
        tokio::fs::write(&tmp, text).await.map_err(io)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io)?;

        tracing::debug!(%key, path = %path.display(), bytes = text.len(), "wrote trading-day document");
        Ok(())
    }
}
