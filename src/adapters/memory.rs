//! In-memory checkpoint storage
//!
//! Process-local storage for dry runs, one-off backfills and tests. Nothing
//! survives the process.

use crate::adapters::traits::CheckpointStorage;
use crate::core::state::checkpoint::Checkpoint;
use crate::domain::ids::TableName;
use crate::domain::{Result, SluiceError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStorage {
    checkpoints: Mutex<BTreeMap<TableName, Checkpoint>>,
    fail_writes: AtomicBool,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `checkpoints`
    pub fn with_checkpoints(checkpoints: impl IntoIterator<Item = Checkpoint>) -> Self {
        let map = checkpoints
            .into_iter()
            .map(|cp| (cp.table_name.clone(), cp))
            .collect();
        Self {
            checkpoints: Mutex::new(map),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent save fail, simulating an unavailable store
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<TableName, Checkpoint>>> {
        self.checkpoints
            .lock()
            .map_err(|_| SluiceError::Other("checkpoint map lock poisoned".to_string()))
    }
}

#[async_trait]
impl CheckpointStorage for InMemoryCheckpointStorage {
    async fn load_checkpoint(&self, table: &TableName) -> Result<Option<Checkpoint>> {
        Ok(self.lock()?.get(table).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SluiceError::CheckpointPersistence(format!(
                "in-memory store rejected write for {}",
                checkpoint.table_name
            )));
        }
        self.lock()?
            .insert(checkpoint.table_name.clone(), checkpoint.clone());
        Ok(())
    }

    async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.lock()?.values().cloned().collect())
    }
}
