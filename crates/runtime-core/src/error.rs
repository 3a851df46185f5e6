//! Error types for the checkpoint runtime

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the checkpoint runtime
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Checkpoint errors
    #[error("Checkpoint state missing on rank {rank} (sharded={sharded}): this process is required to checkpoint")]
    MissingCheckpointState { rank: usize, sharded: bool },

    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    #[error("Invalid trainer state: {message}")]
    InvalidTrainerState { message: String },

    // Storage errors
    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig { .. }
                | Error::MissingCheckpointState { .. }
                | Error::CheckpointCorrupted { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
