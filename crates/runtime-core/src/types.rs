//! Core type definitions for the checkpoint runtime

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Opaque, string-keyed state mapping. The checkpoint manager never looks
/// inside the values.
pub type StateDict = BTreeMap<String, serde_json::Value>;

/// Worker rank in a multi-process run (0 is the primary)
pub type Rank = usize;

/// A point in training, ordered lexicographically by epoch then batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Number of fully completed epochs
    pub epochs_completed: u64,

    /// Number of batches completed within the current epoch
    pub batches_in_epoch_completed: u64,
}

impl Position {
    pub fn new(epochs_completed: u64, batches_in_epoch_completed: u64) -> Self {
        Self {
            epochs_completed,
            batches_in_epoch_completed,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "e{}_b{}",
            self.epochs_completed, self.batches_in_epoch_completed
        )
    }
}

/// Keys owned by [`TrainerState`]'s own counters; `extra` may not use them
pub const RESERVED_TRAINER_KEYS: [&str; 2] = ["epochs_completed", "batches_in_epoch_completed"];

/// Trainer bookkeeping persisted next to the model state.
///
/// The two counters are required; anything else the training loop wants to
/// carry (optimizer state, RNG seeds, ...) goes in `extra` and is flattened
/// into the same mapping on disk. `extra` must not reuse the counter names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub epochs_completed: u64,
    pub batches_in_epoch_completed: u64,
    #[serde(flatten)]
    pub extra: StateDict,
}

impl TrainerState {
    pub fn new(epochs_completed: u64, batches_in_epoch_completed: u64) -> Self {
        Self {
            epochs_completed,
            batches_in_epoch_completed,
            extra: StateDict::new(),
        }
    }

    /// Attach a caller-owned entry. Fails on a reserved counter name.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Result<Self> {
        let key = key.into();
        if RESERVED_TRAINER_KEYS.contains(&key.as_str()) {
            return Err(reserved_key_error(&key));
        }
        self.extra.insert(key, value);
        Ok(self)
    }

    pub fn position(&self) -> Position {
        Position::new(self.epochs_completed, self.batches_in_epoch_completed)
    }

    /// Flatten into an opaque mapping for persistence
    pub fn to_state_dict(&self) -> Result<StateDict> {
        // Flattening would let these shadow the real counters
        if let Some(key) = RESERVED_TRAINER_KEYS
            .iter()
            .find(|key| self.extra.contains_key(**key))
        {
            return Err(reserved_key_error(key));
        }

        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(Error::InvalidTrainerState {
                message: format!("expected a mapping, got {}", other),
            }),
        }
    }

    /// Rebuild from a mapping, requiring both counters
    pub fn from_state_dict(state: StateDict) -> Result<Self> {
        let value = serde_json::Value::Object(state.into_iter().collect());
        serde_json::from_value(value).map_err(|e| Error::InvalidTrainerState {
            message: e.to_string(),
        })
    }
}

fn reserved_key_error(key: &str) -> Error {
    Error::InvalidTrainerState {
        message: format!("extra entry '{}' collides with a trainer counter", key),
    }
}

/// Everything captured for one checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub model_state: StateDict,
    pub trainer_state: TrainerState,
}

impl CheckpointState {
    pub fn new(model_state: StateDict, trainer_state: TrainerState) -> Self {
        Self {
            model_state,
            trainer_state,
        }
    }

    /// Position reported by the trainer state
    pub fn position(&self) -> Position {
        self.trainer_state.position()
    }
}

/// Where decoded state should be materialised. Restores always target host
/// memory; moving values to a device afterwards is the caller's job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapLocation {
    /// Host memory
    #[default]
    Cpu,
}

/// Which half of a checkpoint record a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    /// Model parameters
    Model,

    /// Trainer bookkeeping
    Training,
}

impl StateKind {
    /// Filename stem used on disk
    pub fn file_stem(&self) -> &'static str {
        match self {
            StateKind::Model => "model_state",
            StateKind::Training => "training_state",
        }
    }
}
