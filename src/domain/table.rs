//! Managed table specification

use crate::domain::ids::TableName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named placeholder bound to the previous run's watermark
pub const LAST_RUN_TIME_PLACEHOLDER: &str = ":last_run_time";

/// Default watermark column
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "SystemDate";

/// Suffix of the landing table incremental windows are loaded into
pub const LANDING_TABLE_SUFFIX: &str = "__landing";

/// How the warehouse treats existing data in the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    Append,
    Truncate,
}

impl WriteDisposition {
    /// BigQuery job configuration value
    pub fn as_bigquery(&self) -> &'static str {
        match self {
            Self::Append => "WRITE_APPEND",
            Self::Truncate => "WRITE_TRUNCATE",
        }
    }
}

/// Fact or dimension table; selects the merge SQL folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    #[default]
    Fact,
    Dim,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fact => f.write_str("fact"),
            Self::Dim => f.write_str("dim"),
        }
    }
}

/// How rows of the landing table reach the target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Delete target rows inside the window, then insert the landing rows
    ReplaceWindow,
    /// Update target rows matching on `keys`, insert the others
    Upsert { keys: Vec<String> },
    /// Statement read from the merge SQL directory
    ///
    /// `{target}`, `{landing}`, `{window_start}` and `{window_end}` are
    /// substituted before submission.
    Custom { sql: String },
}

impl MergeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReplaceWindow => "replace_window",
            Self::Upsert { .. } => "upsert",
            Self::Custom { .. } => "custom",
        }
    }
}

/// How a table run writes into the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPlan {
    /// One load job straight into the target table
    Direct(WriteDisposition),
    /// Truncating load into the landing table, then a merge into the target
    Merge,
}

/// Whether a table run is bounded by a SystemDate window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadType {
    Full,
    Incremental,
}

impl fmt::Display for LoadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("Full Load"),
            Self::Incremental => f.write_str("Incremental"),
        }
    }
}

/// One managed table, read-only during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: TableName,
    pub description: String,
    pub base_query: String,
    pub is_incremental: bool,
    pub batch_size: usize,
    pub timestamp_column: String,
    pub target_table: String,
    /// Explicit disposition; `None` derives the load plan from the load type
    pub write_disposition: Option<WriteDisposition>,
    pub exclude_columns: Vec<String>,
    /// Named source database, `None` for the default one
    pub database: Option<String>,
    pub kind: TableKind,
    pub merge: MergeStrategy,
}

impl TableSpec {
    /// Minimal incremental spec with defaults for everything else
    pub fn new(name: TableName, base_query: impl Into<String>) -> Self {
        let target_table = name.as_str().to_string();
        Self {
            name,
            description: String::new(),
            base_query: base_query.into(),
            is_incremental: true,
            batch_size: 10_000,
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            target_table,
            write_disposition: None,
            exclude_columns: Vec::new(),
            database: None,
            kind: TableKind::Fact,
            merge: MergeStrategy::ReplaceWindow,
        }
    }

    /// Load type of this table for a run
    pub fn load_type(&self, force_full_load: bool) -> LoadType {
        if self.is_incremental && !force_full_load {
            LoadType::Incremental
        } else {
            LoadType::Full
        }
    }

    /// Load plan for a run of the given load type
    ///
    /// Full loads replace the target. Incremental windows go through the
    /// landing table and a merge, so loading a window twice leaves one copy of
    /// its rows. An explicit disposition loads straight into the target.
    pub fn load_plan(&self, load_type: LoadType) -> LoadPlan {
        match (self.write_disposition, load_type) {
            (Some(disposition), _) => LoadPlan::Direct(disposition),
            (None, LoadType::Full) => LoadPlan::Direct(WriteDisposition::Truncate),
            (None, LoadType::Incremental) => LoadPlan::Merge,
        }
    }

    /// Warehouse table incremental windows are staged into before the merge
    pub fn landing_table(&self) -> String {
        format!("{}{LANDING_TABLE_SUFFIX}", self.target_table)
    }

    /// Column name the timestamp column arrives under in the warehouse
    ///
    /// `o."SystemDate"` and `o.SystemDate` both land as `SystemDate`.
    pub fn window_column(&self) -> String {
        let column = self.timestamp_column.trim();
        if let Some(quoted) = column
            .rfind(".\"")
            .map(|i| &column[i + 1..])
            .or_else(|| column.starts_with('"').then_some(column))
        {
            return quoted.trim_matches('"').replace("\"\"", "\"");
        }
        column.rsplit('.').next().unwrap_or(column).to_string()
    }
}
