//! Domain error types
//!
//! This module defines the error hierarchy for Sluice. Every failure a table run
//! can hit maps onto one [`SluiceError`] variant, and every variant maps onto a
//! stable [`ErrorKind`] that ends up in the run report.
//! Third-party error types are converted at the adapter boundary and never leak.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Main Sluice error type
#[derive(Debug, Error)]
pub enum SluiceError {
    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration was readable but semantically invalid for a table
    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    /// Extraction window could not be resolved (inverted range, bad offset)
    #[error("Range resolution error: {0}")]
    RangeResolution(String),

    /// Base query could not be rewritten into a safe final query
    #[error("Query rewrite error: {0}")]
    QueryRewrite(String),

    /// Connectivity or timeout failure while reading from the source
    #[error("Transient extraction error: {0}")]
    TransientExtraction(String),

    /// Non-retryable source failure (bad SQL, permission denied, ...)
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A batch could not be published to staging storage
    #[error("Staging error: {0}")]
    Staging(String),

    /// The warehouse refused the load request
    #[error("Load submission error: {0}")]
    LoadSubmission(String),

    /// The warehouse accepted the load job but it finished with an error
    #[error("Load job {job_id} failed: {message}")]
    LoadJobFailed { job_id: String, message: String },

    /// A checkpoint could not be written after a successful load
    #[error("Checkpoint persistence error: {0}")]
    CheckpointPersistence(String),

    /// A checkpoint could not be read before resolving the range
    #[error("Checkpoint read error: {0}")]
    CheckpointRead(String),

    /// Connection setup failure for one of the collaborators
    #[error("Connection error: {0}")]
    Connection(String),

    /// The run was cancelled (shutdown signal or run timeout)
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The execution gate object is missing; staging must not continue
    #[error("Execution halted: {0}")]
    ExecutionHalted(String),

    /// Another run holds the run lock
    #[error("Run locked: {0}")]
    RunLocked(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

/// Stable classification of a [`SluiceError`]
///
/// Used by run reports and exit-code decisions; unlike the error message it
/// never changes between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ConfigValidation,
    RangeResolution,
    QueryRewrite,
    TransientExtraction,
    Extraction,
    Staging,
    LoadSubmission,
    LoadJobFailed,
    CheckpointPersistence,
    CheckpointRead,
    Connection,
    Cancelled,
    ExecutionHalted,
    RunLocked,
    Io,
    Serialization,
    Other,
}

impl ErrorKind {
    /// snake_case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ConfigValidation => "config_validation",
            Self::RangeResolution => "range_resolution",
            Self::QueryRewrite => "query_rewrite",
            Self::TransientExtraction => "transient_extraction",
            Self::Extraction => "extraction",
            Self::Staging => "staging",
            Self::LoadSubmission => "load_submission",
            Self::LoadJobFailed => "load_job_failed",
            Self::CheckpointPersistence => "checkpoint_persistence",
            Self::CheckpointRead => "checkpoint_read",
            Self::Connection => "connection",
            Self::Cancelled => "cancelled",
            Self::ExecutionHalted => "execution_halted",
            Self::RunLocked => "run_locked",
            Self::Io => "io",
            Self::Serialization => "serialization",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SluiceError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::ConfigValidation(_) => ErrorKind::ConfigValidation,
            Self::RangeResolution(_) => ErrorKind::RangeResolution,
            Self::QueryRewrite(_) => ErrorKind::QueryRewrite,
            Self::TransientExtraction(_) => ErrorKind::TransientExtraction,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::Staging(_) => ErrorKind::Staging,
            Self::LoadSubmission(_) => ErrorKind::LoadSubmission,
            Self::LoadJobFailed { .. } => ErrorKind::LoadJobFailed,
            Self::CheckpointPersistence(_) => ErrorKind::CheckpointPersistence,
            Self::CheckpointRead(_) => ErrorKind::CheckpointRead,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::ExecutionHalted(_) => ErrorKind::ExecutionHalted,
            Self::RunLocked(_) => ErrorKind::RunLocked,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether retrying the failed operation may succeed
    ///
    /// Only source connectivity failures, staging failures and connection
    /// setup failures qualify. Resolution, rewrite and load-job failures are
    /// deterministic and retrying them would only repeat the failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientExtraction(_) | Self::Staging(_) | Self::Connection(_)
        )
    }

    /// Whether this error happened before any side effect on the source,
    /// staging storage or warehouse
    pub fn is_pre_side_effect(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConfigValidation
                | ErrorKind::RangeResolution
                | ErrorKind::QueryRewrite
                | ErrorKind::CheckpointRead
        )
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for SluiceError {
    fn from(err: std::io::Error) -> Self {
        SluiceError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for SluiceError {
    fn from(err: serde_json::Error) -> Self {
        SluiceError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for SluiceError {
    fn from(err: toml::de::Error) -> Self {
        SluiceError::Configuration(format!("TOML parse error: {err}"))
    }
}

// Conversion from csv writer errors
impl From<csv::Error> for SluiceError {
    fn from(err: csv::Error) -> Self {
        SluiceError::Serialization(format!("CSV error: {err}"))
    }
}

// Conversion from source database errors
//
// Connection loss, resource exhaustion, operator intervention and
// serialization conflicts are worth another attempt; everything else
// (syntax errors, missing relations, permissions) is not.
impl From<tokio_postgres::Error> for SluiceError {
    fn from(err: tokio_postgres::Error) -> Self {
        let transient = err.is_closed()
            || err
                .code()
                .map(|state| is_transient_sqlstate(state.code()))
                .unwrap_or_else(|| {
                    std::error::Error::source(&err)
                        .is_some_and(|source| source.is::<std::io::Error>())
                });

        let message = match err.as_db_error() {
            Some(db) => format!("{} ({})", db.message(), db.code().code()),
            None => err.to_string(),
        };

        if transient {
            SluiceError::TransientExtraction(message)
        } else {
            SluiceError::Extraction(message)
        }
    }
}

/// SQLSTATE classes 08 (connection), 53 (resources), 57P (operator
/// intervention) plus serialization failure and deadlock
pub(crate) fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("53")
        || code.starts_with("57P")
        || code == "40001"
        || code == "40P01"
}

// Conversion from HTTP client errors
impl From<reqwest::Error> for SluiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            SluiceError::Connection(err.to_string())
        } else if err.is_decode() {
            SluiceError::Serialization(err.to_string())
        } else {
            SluiceError::Other(format!("HTTP error: {err}"))
        }
    }
}
