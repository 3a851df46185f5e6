//! Local filesystem storage backend
//!
//! Provides blocking file I/O with atomic writes to prevent partial/corrupt files.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use runtime_core::{Error, Result};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::StorageBackend;

/// Local filesystem storage backend
///
/// Stores data in a single directory with support for:
/// - Atomic writes (write to .tmp, then rename)
/// - Automatic directory creation
/// - Flat, prefix-filtered listing
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Base path for all storage operations
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// The directory is created lazily on first write.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a relative path to an absolute path
    fn resolve_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }

    /// Generate a unique temporary file path
    fn temp_path(&self, path: &str) -> PathBuf {
        let full_path = self.resolve_path(path);
        let temp_name = format!(
            ".{}.{}.tmp",
            full_path.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        full_path.with_file_name(temp_name)
    }

    fn is_temp_name(name: &str) -> bool {
        name.starts_with('.') && name.ends_with(".tmp")
    }

    fn write_temp(temp_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    }
}

impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    fn read(&self, path: &str) -> Result<Bytes> {
        let full_path = self.resolve_path(path);
        debug!(?full_path, "Reading file");

        match fs::read(&full_path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    fn write(&self, path: &str, data: Bytes) -> Result<u64> {
        let full_path = self.resolve_path(path);
        let temp_path = self.temp_path(path);
        let size = data.len() as u64;

        debug!(?full_path, ?temp_path, size, "Writing file atomically");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let written = Self::write_temp(&temp_path, &data)
            .and_then(|()| fs::rename(&temp_path, &full_path));
        if let Err(e) = written {
            // The temp file may not exist if creating it failed
            let _ = fs::remove_file(&temp_path);
            return Err(Error::Io(e));
        }

        debug!(?full_path, size, "File written successfully");
        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        debug!(?full_path, "Deleting file");

        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.resolve_path(path);
        Ok(full_path.is_file())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut results = Vec::new();

        let entries = match fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(Error::Io(e)),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Non-UTF-8 names can never be ours
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(prefix) && !Self::is_temp_name(&name) {
                results.push(name);
            }
        }

        results.sort();
        debug!(count = results.len(), "Found files");
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    fn modified(&self, path: &str) -> Result<SystemTime> {
        let full_path = self.resolve_path(path);
        match fs::metadata(&full_path) {
            Ok(metadata) => Ok(metadata.modified()?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.resolve_path(path)
    }
}
