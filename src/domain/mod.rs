//! Domain models and types for Sluice.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`TableName`])
//! - **Table and window models** ([`TableSpec`], [`SystemDateConfig`], [`DateBound`])
//! - **Timestamp literal handling** ([`timestamp`])
//! - **Error types** ([`SluiceError`], [`ErrorKind`])
//! - **Result type alias** ([`Result`])
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, SluiceError>`]:
//!
//! ```rust
//! use sluice::domain::{Result, SluiceError};
//!
//! fn example() -> Result<()> {
//!     let config = sluice::config::SluiceConfig::from_file("sluice.toml")?;
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod ids;
pub mod result;
pub mod systemdate;
pub mod table;
pub mod timestamp;

// Re-export commonly used types for convenience
pub use errors::{ErrorKind, SluiceError};
pub use ids::TableName;
pub use result::Result;
pub use systemdate::{DateBound, RelativeUnit, SystemDateConfig};
pub use table::{
    LoadPlan, LoadType, MergeStrategy, TableKind, TableSpec, WriteDisposition,
    LAST_RUN_TIME_PLACEHOLDER,
};
