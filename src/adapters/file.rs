//! JSON file checkpoint storage
//!
//! All checkpoints live in one JSON document keyed by table name. Every save
//! rewrites the document through a temporary file and a rename, so readers
//! see either the previous document or the new one.

use crate::adapters::traits::CheckpointStorage;
use crate::core::state::checkpoint::Checkpoint;
use crate::domain::ids::TableName;
use crate::domain::{Result, SluiceError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

type CheckpointMap = BTreeMap<TableName, Checkpoint>;

/// [`CheckpointStorage`] backed by a local JSON file
pub struct FileCheckpointStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<CheckpointMap> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CheckpointMap::new()),
            Err(e) => {
                return Err(SluiceError::CheckpointRead(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(CheckpointMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            SluiceError::CheckpointRead(format!("{} is not a checkpoint file: {e}", self.path.display()))
        })
    }

    async fn write_map(&self, map: &CheckpointMap) -> Result<()> {
        let persistence =
            |e: std::io::Error| SluiceError::CheckpointPersistence(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(persistence)?;
        }

        let json = serde_json::to_vec_pretty(map)
            .map_err(|e| SluiceError::CheckpointPersistence(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await.map_err(persistence)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(persistence)
    }
}

#[async_trait]
impl CheckpointStorage for FileCheckpointStorage {
    async fn load_checkpoint(&self, table: &TableName) -> Result<Option<Checkpoint>> {
        Ok(self.read_map().await?.remove(table))
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // A corrupt file must not be silently replaced by a single entry
        let mut map = self.read_map().await.map_err(|e| {
            SluiceError::CheckpointPersistence(format!("cannot update checkpoints: {e}"))
        })?;
        map.insert(checkpoint.table_name.clone(), checkpoint.clone());
        self.write_map(&map).await?;

        tracing::debug!(
            table = %checkpoint.table_name,
            path = %self.path.display(),
            "Checkpoint saved to file"
        );
        Ok(())
    }

    async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.read_map().await?.into_values().collect())
    }
}
