//! Storage - backends for checkpoint files
//!
//! Provides blocking storage operations over a flat namespace of file names,
//! with atomic writes so a crashed writer never leaves a half-written file
//! under its final name.
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # fn example() -> runtime_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/checkpoints");
//! storage.write("model_state_e1_b0.pt", Bytes::from(vec![1, 2, 3]))?;
//! let data = storage.read("model_state_e1_b0.pt")?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;

pub use backend::StorageBackend;
pub use local::LocalStorage;
