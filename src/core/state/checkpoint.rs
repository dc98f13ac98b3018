//! Checkpoint model for tracking incremental loads
//!
//! One checkpoint exists per table. It records the upper bound of the last
//! window that was extracted, staged and loaded completely, and is the default
//! lower bound of the next incremental window.

use crate::domain::ids::TableName;
use crate::domain::timestamp;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-table watermark of the last successful run
///
/// # Examples
///
/// ```
/// use sluice::core::state::checkpoint::CheckpointBuilder;
/// use sluice::domain::timestamp::parse_timestamp;
/// use sluice::domain::TableName;
///
/// let checkpoint = CheckpointBuilder::new(
///     TableName::new("orders").unwrap(),
///     parse_timestamp("2024-05-01 00:00:00").unwrap(),
/// )
/// .rows_loaded(1200)
/// .build();
///
/// assert_eq!(checkpoint.last_run_time_literal(), "2024-05-01 00:00:00");
/// assert_eq!(checkpoint.rows_loaded, 1200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub table_name: TableName,

    /// Upper bound of the last fully loaded window, source wall-clock
    #[serde(with = "literal")]
    pub last_run_time: NaiveDateTime,

    /// Rows loaded by the run that wrote this checkpoint
    #[serde(default)]
    pub rows_loaded: u64,

    /// Warehouse job that loaded the window, absent for empty windows
    #[serde(default)]
    pub load_job_id: Option<String>,

    /// When this checkpoint was written
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// `last_run_time` as a `YYYY-MM-DD HH:MM:SS` literal
    pub fn last_run_time_literal(&self) -> String {
        timestamp::format_timestamp(&self.last_run_time)
    }
}

/// Builder for creating Checkpoint instances
pub struct CheckpointBuilder {
    table_name: TableName,
    last_run_time: NaiveDateTime,
    rows_loaded: u64,
    load_job_id: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl CheckpointBuilder {
    pub fn new(table_name: TableName, last_run_time: NaiveDateTime) -> Self {
        Self {
            table_name,
            last_run_time,
            rows_loaded: 0,
            load_job_id: None,
            updated_at: None,
        }
    }

    pub fn rows_loaded(mut self, rows: u64) -> Self {
        self.rows_loaded = rows;
        self
    }

    pub fn load_job_id(mut self, job_id: Option<String>) -> Self {
        self.load_job_id = job_id;
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn build(self) -> Checkpoint {
        Checkpoint {
            table_name: self.table_name,
            last_run_time: self.last_run_time,
            rows_loaded: self.rows_loaded,
            load_job_id: self.load_job_id,
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Serde adapter storing timestamps as `YYYY-MM-DD HH:MM:SS` literals
mod literal {
    use crate::domain::timestamp;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&timestamp::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        timestamp::parse_timestamp(&text).map_err(serde::de::Error::custom)
    }
}
