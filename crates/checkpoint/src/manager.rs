//! Checkpointer: decides when to save, writes records, prunes, and restores

use chrono::{DateTime, Utc};
use runtime_core::{
    CheckpointState, CheckpointerConfig, Error, MapLocation, Position, Rank, RankOracle, Result,
    StateDict, StateKind, TrainerState,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use runtime_core::logging::{rank_prefixed_message, rank_zero_info, rank_zero_warn};
use storage::{LocalStorage, StorageBackend};
use tracing::{debug, info, instrument};

use crate::capture::StateCapture;
use crate::codec::{FramedJsonCodec, StateCodec};
use crate::naming::{parse_state_file_name, state_file_name};
use crate::retention::RetentionPolicy;

/// Locations of both files of one checkpoint record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub model_state: PathBuf,
    pub training_state: PathBuf,
}

/// A complete checkpoint found on storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub position: Position,
    pub paths: CheckpointPaths,
    /// Newest modification time across both files
    pub modified: DateTime<Utc>,
}

/// Checkpoints model and trainer state during training.
///
/// Agnostic to what the states contain: they are opaque mappings handed to a
/// [`StateCodec`], and come back as the same mappings on restore. The caller
/// drives it from a single thread; in multi-process runs every process owns
/// its own instance.
pub struct Checkpointer {
    /// Configuration
    config: CheckpointerConfig,

    /// Where files live
    storage: Arc<dyn StorageBackend>,

    /// How states become bytes
    codec: Arc<dyn StateCodec>,

    /// Rank of this process (0 outside distributed runs)
    rank: Rank,

    /// When the last successful save finished
    last_save_time: Instant,

    /// Position of the last successful save
    last_saved: Position,
}

impl std::fmt::Debug for Checkpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpointer")
            .field("config", &self.config)
            .field("rank", &self.rank)
            .field("last_saved", &self.last_saved)
            .finish()
    }
}

impl Checkpointer {
    /// Create a checkpointer writing framed files under `serialization_dir`
    pub fn new(config: CheckpointerConfig, oracle: &dyn RankOracle) -> Result<Self> {
        let storage = Arc::new(LocalStorage::new(&config.serialization_dir));
        Self::with_backend(config, oracle, storage, Arc::new(FramedJsonCodec))
    }

    /// Create a checkpointer over explicit storage and codec.
    ///
    /// Fails immediately if the configuration asks for time-based saving in a
    /// multi-process run.
    pub fn with_backend(
        config: CheckpointerConfig,
        oracle: &dyn RankOracle,
        storage: Arc<dyn StorageBackend>,
        codec: Arc<dyn StateCodec>,
    ) -> Result<Self> {
        config.validate(oracle.is_distributed())?;
        let rank = oracle.effective_rank();

        debug!(
            rank = rank,
            dir = %config.serialization_dir.display(),
            sharded = config.state_is_sharded,
            "Checkpointer created"
        );

        Ok(Self {
            config,
            storage,
            codec,
            rank,
            last_save_time: Instant::now(),
            last_saved: Position::new(0, 0),
        })
    }

    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }

    pub fn state_is_sharded(&self) -> bool {
        self.config.state_is_sharded
    }

    /// Switch to per-rank shard files
    pub fn set_state_is_sharded(&mut self, sharded: bool) {
        self.config.state_is_sharded = sharded;
    }

    /// Position of the last save performed by this instance
    pub fn last_saved(&self) -> Position {
        self.last_saved
    }

    fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_most_recent_by_count: self.config.keep_most_recent_by_count,
            keep_most_recent_by_age: self.config.keep_most_recent_by_age,
        }
    }

    fn shard(&self) -> Option<Rank> {
        self.config.state_is_sharded.then_some(self.rank)
    }

    fn file_name(&self, kind: StateKind, position: Position) -> String {
        state_file_name(kind, position, self.shard())
    }

    fn paths(&self, position: Position) -> CheckpointPaths {
        CheckpointPaths {
            model_state: self
                .storage
                .resolve(&self.file_name(StateKind::Model, position)),
            training_state: self
                .storage
                .resolve(&self.file_name(StateKind::Training, position)),
        }
    }

    /// Whether a checkpoint is due at this point in training. Read-only.
    pub fn should_save(
        &self,
        epochs_completed: u64,
        batches_in_epoch_completed: u64,
        end_of_epoch: bool,
    ) -> bool {
        // A new epoch restarts the batch interval
        let baseline = if epochs_completed == self.last_saved.epochs_completed {
            self.last_saved.batches_in_epoch_completed
        } else {
            0
        };

        let epoch_due = end_of_epoch && self.config.save_completed_epochs;
        let time_due = self
            .config
            .save_every_num_seconds
            .is_some_and(|interval| self.last_save_time.elapsed() >= interval);
        let batches_due = self.config.save_every_num_batches.is_some_and(|interval| {
            batches_in_epoch_completed.saturating_sub(baseline) >= interval
        });

        epoch_due || time_due || batches_due
    }

    /// Save a checkpoint if one is due. Returns whether a save happened.
    ///
    /// `producer` only runs when a save is due.
    pub fn maybe_save_checkpoint<F>(
        &mut self,
        producer: F,
        epochs_completed: u64,
        batches_in_epoch_completed: u64,
        end_of_epoch: bool,
    ) -> Result<bool>
    where
        F: FnOnce() -> Option<CheckpointState>,
    {
        if !self.should_save(epochs_completed, batches_in_epoch_completed, end_of_epoch) {
            return Ok(false);
        }

        let mut capture = StateCapture::new(producer);
        self.save_checkpoint(&mut capture)?;
        Ok(true)
    }

    /// Persist the captured state and apply retention.
    ///
    /// Existing files for the same position are never overwritten.
    #[instrument(skip(self, capture))]
    pub fn save_checkpoint<F>(&mut self, capture: &mut StateCapture<F>) -> Result<()>
    where
        F: FnOnce() -> Option<CheckpointState>,
    {
        let Some(state) = capture.get() else {
            if self.is_primary() || self.config.state_is_sharded {
                return Err(Error::MissingCheckpointState {
                    rank: self.rank,
                    sharded: self.config.state_is_sharded,
                });
            }
            debug!(
                "{}",
                rank_prefixed_message("No state produced; skipping checkpoint", Some(self.rank))
            );
            return Ok(());
        };

        let position = state.position();
        // Before any write, so a rejected trainer state leaves no half record
        let training_state = state.trainer_state.to_state_dict()?;

        let model_name = self.file_name(StateKind::Model, position);
        if !self.storage.exists(&model_name)? {
            info!(path = %self.storage.resolve(&model_name).display(), "Saving model state");
            let data = self.codec.encode(StateKind::Model, &state.model_state)?;
            self.storage.write(&model_name, data)?;
        } else {
            debug!(file = %model_name, "Model state already on disk");
        }

        let training_name = self.file_name(StateKind::Training, position);
        if !self.storage.exists(&training_name)? {
            info!(path = %self.storage.resolve(&training_name).display(), "Saving training state");
            let data = self.codec.encode(StateKind::Training, &training_state)?;
            self.storage.write(&training_name, data)?;
        } else {
            debug!(file = %training_name, "Training state already on disk");
        }

        self.last_save_time = Instant::now();
        self.last_saved = position;

        if self.owns_pruning() && self.retention_policy().is_enabled() {
            self.prune()?;
        }

        Ok(())
    }

    /// The primary prunes shared checkpoints; with sharded state every rank
    /// prunes its own shard.
    fn owns_pruning(&self) -> bool {
        self.is_primary() || self.config.state_is_sharded
    }

    /// Delete every checkpoint in scope that retention does not keep
    fn prune(&self) -> Result<()> {
        let positions = self.find_all_checkpoints()?;
        let mut candidates = Vec::with_capacity(positions.len());
        for position in positions {
            candidates.push((position, self.newest_modification(position)?));
        }

        let expired = self
            .retention_policy()
            .expired(&candidates, SystemTime::now());
        for position in expired {
            self.remove_checkpoint(position)?;
        }
        Ok(())
    }

    fn newest_modification(&self, position: Position) -> Result<SystemTime> {
        let model = self
            .storage
            .modified(&self.file_name(StateKind::Model, position))?;
        let training = self
            .storage
            .modified(&self.file_name(StateKind::Training, position))?;
        Ok(model.max(training))
    }

    fn remove_checkpoint(&self, position: Position) -> Result<()> {
        for kind in [StateKind::Model, StateKind::Training] {
            let name = self.file_name(kind, position);
            self.storage.delete(&name)?;
        }
        rank_zero_info(self.rank, &format!("Removed expired checkpoint {}", position));
        Ok(())
    }

    /// All complete checkpoints visible to this process: both files present,
    /// rank-scoped when sharded. Unrecognised files are ignored.
    pub fn find_all_checkpoints(&self) -> Result<BTreeSet<Position>> {
        let (models, trainings) = self.scan()?;
        Ok(models.intersection(&trainings).copied().collect())
    }

    /// Positions with a model file and positions with a training file, in scope
    fn scan(&self) -> Result<(BTreeSet<Position>, BTreeSet<Position>)> {
        let shard = self.shard();
        let mut models = BTreeSet::new();
        let mut trainings = BTreeSet::new();

        for name in self.storage.list("")? {
            let Some(parsed) = parse_state_file_name(&name) else {
                continue;
            };
            if parsed.rank != shard {
                continue;
            }
            match parsed.kind {
                StateKind::Model => models.insert(parsed.position),
                StateKind::Training => trainings.insert(parsed.position),
            };
        }

        Ok((models, trainings))
    }

    /// Complete checkpoints with their paths and ages, oldest position first
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>> {
        self.find_all_checkpoints()?
            .into_iter()
            .map(|position| {
                Ok(CheckpointRecord {
                    position,
                    paths: self.paths(position),
                    modified: DateTime::<Utc>::from(self.newest_modification(position)?),
                })
            })
            .collect()
    }

    /// Paths of the most recent complete checkpoint, if any
    pub fn find_latest_checkpoint(&self) -> Result<Option<CheckpointPaths>> {
        Ok(self
            .find_all_checkpoints()?
            .last()
            .map(|position| self.paths(*position)))
    }

    /// Load the most recent checkpoint for resuming training.
    ///
    /// Model state is always decoded to host memory; moving it to a device is
    /// the caller's job. Returns `None` on a fresh start.
    pub fn load_checkpoint(&self) -> Result<Option<CheckpointState>> {
        let (models, trainings) = self.scan()?;
        let newest_seen = models.union(&trainings).last().copied();
        let Some(position) = models.intersection(&trainings).last().copied() else {
            return Ok(None);
        };

        if let Some(newest) = newest_seen.filter(|newest| *newest > position) {
            rank_zero_warn(
                self.rank,
                &format!(
                    "Ignoring incomplete checkpoint {}; resuming from {}",
                    newest, position
                ),
            );
        }

        let model_state = self.read_state(StateKind::Model, position)?;
        let training_name = self.file_name(StateKind::Training, position);
        let trainer_state =
            TrainerState::from_state_dict(self.read_state(StateKind::Training, position)?)?;
        if trainer_state.position() != position {
            return Err(Error::CheckpointCorrupted {
                path: training_name,
                reason: format!("trainer state reports {}", trainer_state.position()),
            });
        }

        rank_zero_info(self.rank, &format!("Loaded checkpoint {}", position));
        Ok(Some(CheckpointState::new(model_state, trainer_state)))
    }

    fn read_state(&self, kind: StateKind, position: Position) -> Result<StateDict> {
        let name = self.file_name(kind, position);
        let data = self.storage.read(&name)?;
        self.codec.decode(kind, &name, &data, MapLocation::Cpu)
    }
}
