//! Checkpointer configuration types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Checkpointer configuration
///
/// All options are fixed for the lifetime of the checkpointer that owns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointerConfig {
    /// Directory where checkpoints are saved
    pub serialization_dir: PathBuf,

    /// Save model and trainer state at the end of each completed epoch
    pub save_completed_epochs: bool,

    /// Never go longer than this between saves (single-process runs only)
    #[serde(with = "optional_millis")]
    pub save_every_num_seconds: Option<Duration>,

    /// Never go longer than this many batches within an epoch between saves
    pub save_every_num_batches: Option<u64>,

    /// Number of most recent checkpoints to keep on disk
    pub keep_most_recent_by_count: Option<usize>,

    /// Keep checkpoints younger than this regardless of count
    #[serde(with = "optional_millis")]
    pub keep_most_recent_by_age: Option<Duration>,

    /// Each process writes its own shard, suffixed by rank
    pub state_is_sharded: bool,
}

impl Default for CheckpointerConfig {
    fn default() -> Self {
        Self {
            serialization_dir: PathBuf::from("./checkpoints"),
            save_completed_epochs: true,
            save_every_num_seconds: None,
            save_every_num_batches: None,
            keep_most_recent_by_count: Some(2),
            keep_most_recent_by_age: None,
            state_is_sharded: false,
        }
    }
}

impl CheckpointerConfig {
    /// Default configuration rooted at `serialization_dir`
    pub fn new<P: AsRef<Path>>(serialization_dir: P) -> Self {
        Self {
            serialization_dir: serialization_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::InvalidConfig {
            message: format!("failed to read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_json_str(&contents)
    }

    /// Check the options against each other and the execution mode
    pub fn validate(&self, distributed: bool) -> Result<()> {
        if distributed && self.save_every_num_seconds.is_some() {
            return Err(Error::InvalidConfig {
                message: "save_every_num_seconds is not supported in distributed training"
                    .to_string(),
            });
        }

        if self.keep_most_recent_by_count == Some(0) {
            return Err(Error::InvalidConfig {
                message: "keep_most_recent_by_count must be at least 1; use None to disable"
                    .to_string(),
            });
        }

        if self.save_every_num_batches == Some(0) {
            return Err(Error::InvalidConfig {
                message: "save_every_num_batches must be at least 1; use None to disable"
                    .to_string(),
            });
        }

        Ok(())
    }
}

/// Optional durations serialize as integer milliseconds
mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
