//! PostgreSQL checkpoint storage
//!
//! Checkpoints live in a single table keyed by table name. Writes are a
//! single `INSERT ... ON CONFLICT DO UPDATE`, so a row is either the previous
//! checkpoint or the new one, never a mix.

use crate::adapters::postgresql::client::PostgresClient;
use crate::adapters::postgresql::models::CheckpointRow;
use crate::adapters::traits::CheckpointStorage;
use crate::core::state::checkpoint::Checkpoint;
use crate::domain::ids::TableName;
use crate::domain::{Result, SluiceError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// [`CheckpointStorage`] backed by a PostgreSQL table
pub struct PostgresCheckpointStorage {
    client: Arc<PostgresClient>,
    table: String,
    schema_ready: OnceCell<()>,
}

impl PostgresCheckpointStorage {
    /// `table` must already be a validated identifier
    pub fn new(client: Arc<PostgresClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            schema_ready: OnceCell::new(),
        }
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                table_name    TEXT PRIMARY KEY,
                last_run_time TIMESTAMP NOT NULL,
                rows_loaded   BIGINT NOT NULL DEFAULT 0,
                load_job_id   TEXT,
                updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table
        )
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (table_name, last_run_time, rows_loaded, load_job_id, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (table_name) DO UPDATE SET
                last_run_time = EXCLUDED.last_run_time,
                rows_loaded   = EXCLUDED.rows_loaded,
                load_job_id   = EXCLUDED.load_job_id,
                updated_at    = EXCLUDED.updated_at",
            self.table
        )
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT table_name, last_run_time, rows_loaded, load_job_id, updated_at FROM {}",
            self.table
        )
    }

    /// Create the checkpoint table once per process
    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                let conn = self.client.get_connection().await?;
                conn.batch_execute(&self.create_table_sql())
                    .await
                    .map_err(|e| {
                        SluiceError::Connection(format!(
                            "Failed to create checkpoint table {}: {}",
                            self.table, e
                        ))
                    })?;
                tracing::debug!(table = %self.table, "Checkpoint table ready");
                Ok::<(), SluiceError>(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl CheckpointStorage for PostgresCheckpointStorage {
    async fn load_checkpoint(&self, table: &TableName) -> Result<Option<Checkpoint>> {
        self.ensure_schema().await?;

        tracing::debug!(table = %table, "Loading checkpoint from PostgreSQL");

        let conn = self.client.get_connection().await?;
        let query = format!("{} WHERE table_name = $1", self.select_sql());
        let rows = conn
            .query(&query, &[&table.as_str()])
            .await
            .map_err(|e| SluiceError::CheckpointRead(format!("{table}: {e}")))?;

        match rows.first() {
            Some(row) => CheckpointRow::from_row(row)?.to_domain().map(Some),
            None => {
                tracing::debug!(table = %table, "No checkpoint found (first run)");
                Ok(None)
            }
        }
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.ensure_schema().await?;

        let row = CheckpointRow::from_domain(checkpoint);
        let conn = self.client.get_connection().await?;
        conn.execute(
            &self.upsert_sql(),
            &[
                &row.table_name,
                &row.last_run_time,
                &row.rows_loaded,
                &row.load_job_id,
                &row.updated_at,
            ],
        )
        .await
        .map_err(|e| SluiceError::CheckpointPersistence(format!("{}: {e}", row.table_name)))?;

        tracing::debug!(
            table = %checkpoint.table_name,
            last_run_time = %checkpoint.last_run_time_literal(),
            "Checkpoint saved to PostgreSQL"
        );
        Ok(())
    }

    async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.ensure_schema().await?;

        let conn = self.client.get_connection().await?;
        let query = format!("{} ORDER BY table_name", self.select_sql());
        let rows = conn
            .query(&query, &[])
            .await
            .map_err(|e| SluiceError::CheckpointRead(e.to_string()))?;

        rows.iter()
            .map(|row| CheckpointRow::from_row(row)?.to_domain())
            .collect()
    }
}
