//! Checkpoint lifecycle management for training runs
//!
//! Decides when to save, names and writes checkpoint records, prunes old ones
//! by count and age, and restores the most recent one on resume.

pub mod capture;
pub mod codec;
pub mod manager;
pub mod naming;
pub mod retention;

pub use capture::StateCapture;
pub use codec::{FramedJsonCodec, StateCodec};
pub use manager::{CheckpointPaths, CheckpointRecord, Checkpointer};
pub use retention::RetentionPolicy;
