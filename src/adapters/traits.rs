//! Collaborator traits
//!
//! This module defines the interfaces the pipeline needs from the outside
//! world: a relational source that streams rows, an object store for staged
//! files, a warehouse that runs load and merge jobs and a persistent
//! checkpoint store.
//! Every trait is object safe and used as `Arc<dyn Trait + Send + Sync>`.

use crate::core::incremental::resolver::ResolvedRange;
use crate::core::incremental::rewriter::FinalQuery;
use crate::core::state::checkpoint::Checkpoint;
use crate::domain::ids::TableName;
use crate::domain::table::{MergeStrategy, WriteDisposition};
use crate::domain::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// One fetch worth of rows, all values rendered as text
///
/// `None` is SQL NULL. Every row has exactly `columns.len()` values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RowBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Lazy, forward-only stream of row batches
#[async_trait]
pub trait RowCursor: Send {
    /// Fetch the next batch, `None` once the result set is exhausted
    ///
    /// # Errors
    ///
    /// Connectivity failures are reported as
    /// [`SluiceError::TransientExtraction`](crate::domain::SluiceError::TransientExtraction),
    /// everything else as [`SluiceError::Extraction`](crate::domain::SluiceError::Extraction).
    async fn next_batch(&mut self) -> Result<Option<RowBatch>>;

    /// Release the server-side cursor
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Relational source executing final queries
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Check that the source is reachable
    async fn test_connection(&self) -> Result<()>;

    /// Start executing `query`, returning at most `fetch_size` rows per batch
    async fn open_cursor(&self, query: &FinalQuery, fetch_size: usize)
        -> Result<Box<dyn RowCursor>>;
}

/// Acknowledgement of a published object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedObject {
    /// Path relative to the staging root
    pub path: String,
    /// Fully-qualified reference the warehouse can load from
    pub uri: String,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the object body
    pub sha256: String,
}

/// Object storage used for staged batch files
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Publish `bytes` at `path`, overwriting any previous object
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::Staging`](crate::domain::SluiceError::Staging) when
    /// the object could not be written.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<StagedObject>;

    /// Publish `bytes` at `path` only if no object exists there yet
    ///
    /// Returns `false`, without writing, when the path is already taken. The
    /// check and the write are one atomic step of the backend.
    async fn put_if_absent(&self, path: &str, bytes: Vec<u8>) -> Result<bool>;

    /// Read an object, `None` when it does not exist
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Whether an object exists at `path`
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Remove a previously published object; missing objects are not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Human readable location of the staging root, for logs
    fn describe(&self) -> String;
}

/// Load job registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub table_name: TableName,
    pub destination_table: String,
    pub source_uris: Vec<String>,
    pub write_disposition: WriteDisposition,
    /// Create a missing destination with the schema of this table first
    pub create_like: Option<String>,
}

/// Merge of a loaded landing table into its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub table_name: TableName,
    pub target_table: String,
    pub landing_table: String,
    /// Columns of the staged files, in file order
    pub columns: Vec<String>,
    /// Target column the window bounds
    pub window_column: String,
    pub window: ResolvedRange,
    pub strategy: MergeStrategy,
}

/// Opaque handle of a submitted load job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJobHandle {
    pub job_id: String,
    pub location: Option<String>,
}

impl fmt::Display for LoadJobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.job_id)
    }
}

/// Terminal state of a successful load job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadJobReport {
    pub job_id: String,
    /// Rows reported by the warehouse, when it reports them
    pub output_rows: Option<u64>,
}

/// Warehouse that loads staged objects into tables
#[async_trait]
pub trait LoadSubmitter: Send + Sync {
    /// Register a load job
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::LoadSubmission`](crate::domain::SluiceError::LoadSubmission)
    /// when the warehouse refuses the request.
    async fn submit(&self, request: &LoadRequest) -> Result<LoadJobHandle>;

    /// Register a job merging the landing table into the target table
    ///
    /// The merge is atomic: the target shows either all of it or none.
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::LoadSubmission`](crate::domain::SluiceError::LoadSubmission)
    /// when the warehouse refuses the statement.
    async fn submit_merge(&self, request: &MergeRequest) -> Result<LoadJobHandle>;

    /// Wait until a load or merge job reaches a terminal state
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::LoadJobFailed`](crate::domain::SluiceError::LoadJobFailed)
    /// when the job finishes with an error.
    async fn wait(&self, handle: &LoadJobHandle) -> Result<LoadJobReport>;
}

/// Checkpoint persistence keyed by table name
///
/// Implementations must be read-after-write consistent for a single key.
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Load the checkpoint of a table, `None` before its first successful run
    async fn load_checkpoint(&self, table: &TableName) -> Result<Option<Checkpoint>>;

    /// Insert or replace the checkpoint of `checkpoint.table_name`
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// All stored checkpoints, ordered by table name
    async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>>;
}
