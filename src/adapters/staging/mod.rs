//! Staging storage backends
//!
//! - [`gcs`] - Google Cloud Storage JSON API
//! - [`local`] - a directory on the local filesystem

pub mod gcs;
pub mod local;

pub use gcs::GcsStagingStore;
pub use local::LocalStagingStore;

use crate::adapters::traits::StagedObject;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an object body
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Acknowledgement for `bytes` published at `path`
pub(crate) fn staged_object(path: &str, uri: String, bytes: &[u8]) -> StagedObject {
    StagedObject {
        path: path.to_string(),
        uri,
        size_bytes: bytes.len() as u64,
        sha256: sha256_hex(bytes),
    }
}
