//! Cross-process run lock
//!
//! An object in staging storage written with a create-only put. While it
//! exists no other run starts. The object names its holder, and only the
//! holding run deletes it.

use crate::adapters::traits::StagingStore;
use crate::domain::{Result, SluiceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Contents of the lock object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub run_id: Uuid,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    pub fn current(run_id: Uuid) -> Self {
        Self {
            run_id,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} (pid {}) since {}",
            self.run_id,
            self.pid,
            self.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// Result of [`RunLock::acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Granted(LockHolder),
    /// Someone else holds the lock; `None` when the object is unreadable
    HeldBy(Option<LockHolder>),
}

pub struct RunLock {
    store: Arc<dyn StagingStore + Send + Sync>,
    path: String,
}

impl RunLock {
    pub fn new(store: Arc<dyn StagingStore + Send + Sync>, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Try to take the lock for `run_id`
    pub async fn acquire(&self, run_id: Uuid) -> Result<LockAttempt> {
        let holder = LockHolder::current(run_id);
        let body = serde_json::to_vec(&holder)?;
        if self.store.put_if_absent(&self.path, body).await? {
            tracing::info!(run_id = %run_id, lock = %self.path, "Run lock acquired");
            return Ok(LockAttempt::Granted(holder));
        }
        Ok(LockAttempt::HeldBy(self.holder().await?))
    }

    /// Current holder, `None` when unlocked or unreadable
    pub async fn holder(&self) -> Result<Option<LockHolder>> {
        let Some(bytes) = self.store.get(&self.path).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(holder) => Ok(Some(holder)),
            Err(e) => {
                tracing::warn!(lock = %self.path, error = %e, "Run lock object is unreadable");
                Ok(None)
            }
        }
    }

    /// Delete the lock if `holder` still owns it
    ///
    /// Returns `false` when the lock is gone or belongs to another run.
    pub async fn release(&self, holder: &LockHolder) -> Result<bool> {
        match self.holder().await? {
            Some(current) if current.run_id == holder.run_id => {
                self.store.delete(&self.path).await?;
                tracing::info!(run_id = %holder.run_id, lock = %self.path, "Run lock released");
                Ok(true)
            }
            Some(current) => {
                tracing::warn!(
                    run_id = %holder.run_id,
                    lock = %self.path,
                    holder = %current,
                    "Run lock belongs to another run, leaving it in place"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Delete the lock whoever holds it
    pub async fn force_release(&self) -> Result<Option<LockHolder>> {
        let holder = self.holder().await?;
        self.store.delete(&self.path).await.map_err(|e| {
            SluiceError::Staging(format!("Removing run lock {} failed: {e}", self.path))
        })?;
        tracing::warn!(lock = %self.path, holder = ?holder, "Run lock removed by operator");
        Ok(holder)
    }
}
