//! PostgreSQL checkpoint row model

use crate::core::state::checkpoint::{Checkpoint, CheckpointBuilder};
use crate::domain::ids::TableName;
use crate::domain::{Result, SluiceError};
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::Row;

/// One row of the checkpoint table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRow {
    pub table_name: String,
    /// `TIMESTAMP` (without zone): the source's wall-clock
    pub last_run_time: NaiveDateTime,
    pub rows_loaded: i64,
    pub load_job_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRow {
    /// Read the columns of a `SELECT` over the checkpoint table
    pub fn from_row(row: &Row) -> Result<Self> {
        let column = |e: tokio_postgres::Error| {
            SluiceError::CheckpointRead(format!("Unexpected checkpoint row: {e}"))
        };
        Ok(Self {
            table_name: row.try_get("table_name").map_err(column)?,
            last_run_time: row.try_get("last_run_time").map_err(column)?,
            rows_loaded: row.try_get("rows_loaded").map_err(column)?,
            load_job_id: row.try_get("load_job_id").map_err(column)?,
            updated_at: row.try_get("updated_at").map_err(column)?,
        })
    }

    pub fn from_domain(checkpoint: &Checkpoint) -> Self {
        Self {
            table_name: checkpoint.table_name.as_str().to_string(),
            last_run_time: checkpoint.last_run_time,
            rows_loaded: i64::try_from(checkpoint.rows_loaded).unwrap_or(i64::MAX),
            load_job_id: checkpoint.load_job_id.clone(),
            updated_at: checkpoint.updated_at,
        }
    }

    pub fn to_domain(&self) -> Result<Checkpoint> {
        let table_name = TableName::new(self.table_name.clone()).map_err(|e| {
            SluiceError::CheckpointRead(format!(
                "Invalid table name '{}' in checkpoint table: {e}",
                self.table_name
            ))
        })?;

        Ok(CheckpointBuilder::new(table_name, self.last_run_time)
            .rows_loaded(u64::try_from(self.rows_loaded).unwrap_or_default())
            .load_job_id(self.load_job_id.clone())
            .updated_at(self.updated_at)
            .build())
    }
}
