//! Logging and observability
//!
//! This module provides structured logging with support for:
//! - Human readable console output
//! - JSON-formatted log files with daily or hourly rotation
//! - `RUST_LOG` style filter overrides
//! - Field conventions shared by every table run (`table`, `state`, `attempt`)
//!
//! # Example
//!
//! ```no_run
//! use sluice::logging::init_logging;
//! use sluice::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(table = "orders", "Table started");
//! ```

pub mod structured;

// Re-export commonly used items
pub use structured::{init_logging, LoggingGuard};

/// Alert tag attached to checkpoint persistence failures
pub const CHECKPOINT_NOT_RECORDED: &str = "checkpoint_not_recorded";

/// Log a table state machine transition
///
/// # Example
///
/// ```no_run
/// use sluice::log_table_transition;
///
/// log_table_transition!("orders", "extracting", "staging");
/// ```
#[macro_export]
macro_rules! log_table_transition {
    ($table:expr, $from:expr, $to:expr) => {
        tracing::debug!(
            table = %$table,
            from = %$from,
            to = %$to,
            "Table state transition"
        );
    };
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use sluice::log_retry_attempt;
///
/// log_retry_attempt!("orders", "stage batch 3", 2, 3, 400u64, "503 Service Unavailable");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($table:expr, $operation:expr, $attempt:expr, $max_attempts:expr, $delay_ms:expr, $reason:expr) => {
        tracing::warn!(
            table = %$table,
            operation = %$operation,
            attempt = $attempt,
            max_attempts = $max_attempts,
            delay_ms = $delay_ms,
            reason = %$reason,
            "Retrying operation"
        );
    };
}

/// Log a load whose checkpoint could not be recorded
///
/// Emitted at error level with `alert = "checkpoint_not_recorded"`; the
/// table's data is in the warehouse but the next run will extract the same
/// window again.
///
/// # Example
///
/// ```no_run
/// use sluice::log_checkpoint_not_recorded;
///
/// log_checkpoint_not_recorded!("orders", "2024-06-01 12:00:00", "connection reset");
/// ```
#[macro_export]
macro_rules! log_checkpoint_not_recorded {
    ($table:expr, $last_run_time:expr, $error:expr) => {
        tracing::error!(
            alert = $crate::logging::CHECKPOINT_NOT_RECORDED,
            table = %$table,
            last_run_time = %$last_run_time,
            error = %$error,
            "Load completed but checkpoint was not recorded"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use sluice::log_error_with_context;
/// use sluice::domain::SluiceError;
///
/// let error = SluiceError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_expand() {
        let table = "orders";
        crate::log_table_transition!(table, "pending", "resolving");
        crate::log_retry_attempt!(table, "open cursor", 1, 3, 200u64, "timeout");
        crate::log_checkpoint_not_recorded!(table, "2024-06-01 12:00:00", "unavailable");
        crate::log_error_with_context!("boom", "testing");
    }
}
