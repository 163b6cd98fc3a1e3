use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::ports::{FileStorage, StorageError};
use crate::utils::sanitize::sanitize_filename;

/// Writes uploads into one flat directory; names are never reused.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let safe = sanitize_filename(filename)
            .ok_or_else(|| StorageError::InvalidFilename(filename.to_string()))?;

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(&safe);

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(safe));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), content_type, size = bytes.len(), "Stored file");
        Ok(path.to_string_lossy().into_owned())
    }
}
