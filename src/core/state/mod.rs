// Checkpoint model and monotonic checkpoint management

pub mod checkpoint;
pub mod manager;

pub use checkpoint::{Checkpoint, CheckpointBuilder};
pub use manager::{CheckpointManager, CommitOutcome};
