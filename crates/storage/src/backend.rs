//! Storage backend trait definition
//!
//! Defines the blocking interface the checkpointer uses to touch durable
//! storage. Paths are file names relative to the backend root.

use bytes::Bytes;
use runtime_core::Result;
use std::path::PathBuf;
use std::time::SystemTime;

/// Blocking trait for storage backends
///
/// Implementors provide basic CRUD operations for binary data plus the
/// modification time needed by age-based retention.
pub trait StorageBackend: Send + Sync {
    /// Read data from the given path
    ///
    /// # Errors
    /// Returns error if path doesn't exist or read fails
    fn read(&self, path: &str) -> Result<Bytes>;

    /// Write data to the given path
    ///
    /// Uses atomic writes where possible (write to temp, then rename).
    ///
    /// # Returns
    /// Number of bytes written
    fn write(&self, path: &str, data: Bytes) -> Result<u64>;

    /// Delete data at the given path
    ///
    /// # Errors
    /// Returns error if path doesn't exist or deletion fails
    fn delete(&self, path: &str) -> Result<()>;

    /// Check if a path exists
    fn exists(&self, path: &str) -> Result<bool>;

    /// List file names directly under the root that start with `prefix`
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Last modification time of the given path
    fn modified(&self, path: &str) -> Result<SystemTime>;

    /// Location of `path` as seen by the rest of the process
    fn resolve(&self, path: &str) -> PathBuf;
}
