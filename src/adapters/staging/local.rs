//! Local filesystem staging backend

use crate::adapters::staging::staged_object;
use crate::adapters::traits::{StagedObject, StagingStore};
use crate::domain::{Result, SluiceError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// [`StagingStore`] writing below a local directory
///
/// Objects are written to a temporary sibling and renamed into place, so a
/// reader never sees a partially written file.
pub struct LocalStagingStore {
    root: PathBuf,
}

impl LocalStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute location of `path`, rejecting anything that escapes the root
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(SluiceError::Staging(format!(
                "Invalid staging path '{path}'"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StagingStore for LocalStagingStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StagedObject> {
        let target = self.resolve(path)?;
        let io_err = |e: std::io::Error| {
            SluiceError::Staging(format!("Writing {} failed: {e}", target.display()))
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let temp = target.with_extension("csv.tmp");
        tokio::fs::write(&temp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&temp, &target).await.map_err(io_err)?;

        let absolute = tokio::fs::canonicalize(&target).await.map_err(io_err)?;
        let uri = format!("file://{}", absolute.display());

        tracing::debug!(uri = %uri, bytes = bytes.len(), "Wrote staging object");
        Ok(staged_object(path, uri, &bytes))
    }

    async fn put_if_absent(&self, path: &str, bytes: Vec<u8>) -> Result<bool> {
        use tokio::io::AsyncWriteExt;

        let target = self.resolve(path)?;
        let io_err = |e: std::io::Error| {
            SluiceError::Staging(format!("Writing {} failed: {e}", target.display()))
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(io_err(e)),
        };
        file.write_all(&bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(true)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SluiceError::Staging(format!(
                "Reading {} failed: {e}",
                target.display()
            ))),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SluiceError::Staging(format!(
                "Deleting {} failed: {e}",
                target.display()
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
