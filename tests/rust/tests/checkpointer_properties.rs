//! Behavioural properties of the checkpointer against a real directory

use anyhow::Result;
use checkpoint::{Checkpointer, StateCapture};
use runtime_core::{
    CheckpointState, CheckpointerConfig, EnvRankOracle, Error, Position, SingleProcess,
    StateDict, StaticRank, TrainerState,
};
use serde_json::json;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn state(epochs: u64, batches: u64) -> CheckpointState {
    let mut model = StateDict::new();
    model.insert("layer.weight".to_string(), json!([epochs as f64, batches as f64, 0.5]));
    CheckpointState::new(model, TrainerState::new(epochs, batches))
}

fn save(checkpointer: &mut Checkpointer, epochs: u64, batches: u64) -> Result<()> {
    let mut capture = StateCapture::ready(Some(state(epochs, batches)));
    checkpointer.save_checkpoint(&mut capture)?;
    Ok(())
}

fn set_mtime(path: &Path, when: SystemTime) -> Result<()> {
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(when)?;
    Ok(())
}

fn backdate(dir: &Path, position: &str, secs: u64) -> Result<SystemTime> {
    let when = SystemTime::now() - Duration::from_secs(secs);
    for stem in ["model_state", "training_state"] {
        set_mtime(&dir.join(format!("{}_{}.pt", stem, position)), when)?;
    }
    Ok(when)
}

fn positions(checkpointer: &Checkpointer) -> Result<Vec<Position>> {
    Ok(checkpointer.find_all_checkpoints()?.into_iter().collect())
}

#[test]
fn test_idempotent_save_never_overwrites() -> Result<()> {
    let dir = TempDir::new()?;
    let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path()), &SingleProcess)?;
    save(&mut checkpointer, 1, 0)?;

    let written_at = backdate(dir.path(), "e1_b0", 120)?;
    let model_path = dir.path().join("model_state_e1_b0.pt");
    let before = std::fs::metadata(&model_path)?.modified()?;

    // Same position, different content
    let mut changed = state(1, 0);
    changed.model_state.insert("extra".to_string(), json!(true));
    let mut capture = StateCapture::ready(Some(changed));
    checkpointer.save_checkpoint(&mut capture)?;

    assert_eq!(std::fs::metadata(&model_path)?.modified()?, before);
    let training_mtime = std::fs::metadata(dir.path().join("training_state_e1_b0.pt"))?.modified()?;
    assert!(training_mtime.duration_since(written_at).unwrap_or_default() < Duration::from_secs(1));

    let loaded = checkpointer.load_checkpoint()?.expect("checkpoint exists");
    assert_eq!(loaded, state(1, 0));
    Ok(())
}

#[test]
fn test_count_retention_keeps_largest_positions() -> Result<()> {
    let dir = TempDir::new()?;
    let config = CheckpointerConfig {
        keep_most_recent_by_count: Some(3),
        ..CheckpointerConfig::new(dir.path())
    };
    let mut checkpointer = Checkpointer::new(config, &SingleProcess)?;

    // Out of order on purpose: retention goes by position, not write order
    for (e, b) in [(0, 50), (1, 0), (0, 100), (2, 10), (1, 75), (0, 10)] {
        save(&mut checkpointer, e, b)?;
        assert!(checkpointer.find_all_checkpoints()?.len() <= 3);
    }

    assert_eq!(
        positions(&checkpointer)?,
        vec![Position::new(1, 0), Position::new(1, 75), Position::new(2, 10)]
    );
    Ok(())
}

#[test]
fn test_age_retention_deletes_old_checkpoints_outside_count() -> Result<()> {
    let dir = TempDir::new()?;
    let config = CheckpointerConfig {
        keep_most_recent_by_count: Some(1),
        keep_most_recent_by_age: Some(Duration::from_secs(60)),
        ..CheckpointerConfig::new(dir.path())
    };
    let mut checkpointer = Checkpointer::new(config, &SingleProcess)?;

    save(&mut checkpointer, 0, 1)?;
    save(&mut checkpointer, 0, 2)?;
    save(&mut checkpointer, 0, 3)?;
    // Everything is fresh, so age keeps what count would drop
    assert_eq!(positions(&checkpointer)?.len(), 3);

    backdate(dir.path(), "e0_b1", 3600)?;
    save(&mut checkpointer, 0, 4)?;

    assert_eq!(
        positions(&checkpointer)?,
        vec![Position::new(0, 2), Position::new(0, 3), Position::new(0, 4)]
    );
    assert!(!dir.path().join("model_state_e0_b1.pt").exists());
    assert!(!dir.path().join("training_state_e0_b1.pt").exists());
    Ok(())
}

#[test]
fn test_count_survivors_are_kept_regardless_of_age() -> Result<()> {
    let dir = TempDir::new()?;
    let config = CheckpointerConfig {
        keep_most_recent_by_count: Some(2),
        keep_most_recent_by_age: Some(Duration::from_secs(60)),
        ..CheckpointerConfig::new(dir.path())
    };
    let mut checkpointer = Checkpointer::new(config, &SingleProcess)?;

    save(&mut checkpointer, 3, 0)?;
    save(&mut checkpointer, 4, 0)?;
    save(&mut checkpointer, 5, 0)?;
    for position in ["e3_b0", "e4_b0", "e5_b0"] {
        backdate(dir.path(), position, 7200)?;
    }

    // An older position written now is kept by age only
    save(&mut checkpointer, 0, 9)?;

    assert_eq!(
        positions(&checkpointer)?,
        vec![Position::new(0, 9), Position::new(4, 0), Position::new(5, 0)]
    );
    Ok(())
}

#[test]
fn test_batch_interval_resets_on_epoch_change() -> Result<()> {
    let dir = TempDir::new()?;
    let config = CheckpointerConfig {
        save_completed_epochs: false,
        save_every_num_batches: Some(100),
        ..CheckpointerConfig::new(dir.path())
    };
    let mut checkpointer = Checkpointer::new(config, &SingleProcess)?;

    assert!(checkpointer.maybe_save_checkpoint(|| Some(state(0, 100)), 0, 100, false)?);
    assert!(!checkpointer.should_save(1, 50, false));
    assert!(!checkpointer.maybe_save_checkpoint(|| Some(state(1, 50)), 1, 50, false)?);
    assert!(checkpointer.should_save(1, 100, false));
    assert!(checkpointer.maybe_save_checkpoint(|| Some(state(1, 100)), 1, 100, false)?);

    assert_eq!(
        positions(&checkpointer)?,
        vec![Position::new(0, 100), Position::new(1, 100)]
    );
    Ok(())
}

#[test]
fn test_resume_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let mut model = StateDict::new();
    model.insert("embedding".to_string(), json!([[1.0, 2.0], [3.0, 4.0]]));
    model.insert("config".to_string(), json!({"layers": 4, "activation": "gelu"}));
    let trainer = TrainerState::new(2, 300)
        .with_extra("optimizer", json!({"step": 900, "lr": 0.0003}))?
        .with_extra("best_metric", json!(0.875))?;
    let saved = CheckpointState::new(model, trainer);

    {
        let mut checkpointer =
            Checkpointer::new(CheckpointerConfig::new(dir.path()), &SingleProcess)?;
        save(&mut checkpointer, 1, 0)?;
        let mut capture = StateCapture::ready(Some(saved.clone()));
        checkpointer.save_checkpoint(&mut capture)?;
    }

    // A fresh process resumes from disk
    let checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path()), &SingleProcess)?;
    let loaded = checkpointer.load_checkpoint()?.expect("checkpoint exists");
    assert_eq!(loaded, saved);
    assert_eq!(loaded.trainer_state.position(), Position::new(2, 300));

    let latest = checkpointer.find_latest_checkpoint()?.expect("checkpoint exists");
    assert_eq!(latest.model_state, dir.path().join("model_state_e2_b300.pt"));
    Ok(())
}

#[test]
fn test_sharded_ranks_never_touch_each_other() -> Result<()> {
    let dir = TempDir::new()?;
    let config = CheckpointerConfig {
        keep_most_recent_by_count: Some(1),
        state_is_sharded: true,
        ..CheckpointerConfig::new(dir.path())
    };
    let mut rank0 = Checkpointer::new(config.clone(), &StaticRank::new(0, 2)?)?;
    let mut rank1 = Checkpointer::new(config, &StaticRank::new(1, 2)?)?;

    save(&mut rank0, 0, 10)?;
    save(&mut rank1, 0, 10)?;
    for name in [
        "model_state_e0_b10_w0.pt",
        "training_state_e0_b10_w0.pt",
        "model_state_e0_b10_w1.pt",
        "training_state_e0_b10_w1.pt",
    ] {
        assert!(dir.path().join(name).is_file(), "{name} missing");
    }

    save(&mut rank0, 0, 20)?;

    assert!(!dir.path().join("model_state_e0_b10_w0.pt").exists());
    assert!(dir.path().join("model_state_e0_b10_w1.pt").is_file());
    assert!(dir.path().join("training_state_e0_b10_w1.pt").is_file());
    assert_eq!(positions(&rank0)?, vec![Position::new(0, 20)]);
    assert_eq!(positions(&rank1)?, vec![Position::new(0, 10)]);

    let loaded = rank1.load_checkpoint()?.expect("rank 1 shard exists");
    assert_eq!(loaded.position(), Position::new(0, 10));
    Ok(())
}

#[test]
fn test_trainer_extra_cannot_change_resume_position() -> Result<()> {
    let dir = TempDir::new()?;
    let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path()), &SingleProcess)?;

    let rejected = TrainerState::new(2, 300).with_extra("epochs_completed", json!(99));
    assert!(matches!(rejected, Err(Error::InvalidTrainerState { .. })));

    let mut shadowed = state(2, 300);
    shadowed
        .trainer_state
        .extra
        .insert("epochs_completed".to_string(), json!(99));
    let err = checkpointer
        .save_checkpoint(&mut StateCapture::ready(Some(shadowed)))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTrainerState { .. }));
    assert!(checkpointer.load_checkpoint()?.is_none());

    save(&mut checkpointer, 2, 300)?;
    let loaded = checkpointer.load_checkpoint()?.expect("checkpoint exists");
    assert_eq!(loaded.trainer_state.position(), Position::new(2, 300));
    Ok(())
}

#[test]
fn test_sharded_secondary_prunes_its_own_shard() -> Result<()> {
    let dir = TempDir::new()?;
    let config = CheckpointerConfig {
        keep_most_recent_by_count: Some(1),
        state_is_sharded: true,
        ..CheckpointerConfig::new(dir.path())
    };
    let mut rank0 = Checkpointer::new(config.clone(), &StaticRank::new(0, 2)?)?;
    let mut rank1 = Checkpointer::new(config, &StaticRank::new(1, 2)?)?;

    save(&mut rank0, 0, 5)?;
    save(&mut rank1, 0, 5)?;
    save(&mut rank1, 0, 10)?;

    assert!(!dir.path().join("model_state_e0_b5_w1.pt").exists());
    assert!(!dir.path().join("training_state_e0_b5_w1.pt").exists());
    assert_eq!(positions(&rank1)?, vec![Position::new(0, 10)]);
    // Rank 0 never saved past (0, 5), so its shard is untouched
    assert_eq!(positions(&rank0)?, vec![Position::new(0, 5)]);
    Ok(())
}

#[test]
fn test_sharded_enumeration_ignores_unsharded_files() -> Result<()> {
    let dir = TempDir::new()?;
    let mut single = Checkpointer::new(CheckpointerConfig::new(dir.path()), &SingleProcess)?;
    save(&mut single, 7, 0)?;

    let config = CheckpointerConfig {
        state_is_sharded: true,
        ..CheckpointerConfig::new(dir.path())
    };
    let sharded = Checkpointer::new(config, &StaticRank::new(0, 2)?)?;
    assert!(sharded.find_latest_checkpoint()?.is_none());
    assert_eq!(positions(&single)?, vec![Position::new(7, 0)]);
    Ok(())
}

#[test]
fn test_only_primary_prunes_shared_checkpoints() -> Result<()> {
    let dir = TempDir::new()?;
    let config = CheckpointerConfig {
        keep_most_recent_by_count: Some(1),
        ..CheckpointerConfig::new(dir.path())
    };
    let mut primary = Checkpointer::new(config.clone(), &StaticRank::new(0, 2)?)?;
    let mut secondary = Checkpointer::new(config, &StaticRank::new(1, 2)?)?;

    // Secondaries normally opt out
    let mut nothing = StateCapture::ready(None);
    secondary.save_checkpoint(&mut nothing)?;

    save(&mut primary, 0, 1)?;
    save(&mut primary, 0, 2)?;
    assert_eq!(positions(&primary)?, vec![Position::new(0, 2)]);

    save(&mut secondary, 0, 3)?;
    assert_eq!(
        positions(&primary)?,
        vec![Position::new(0, 2), Position::new(0, 3)]
    );
    Ok(())
}

#[test]
fn test_seconds_trigger_rejected_in_multi_process_run() -> Result<()> {
    let dir = TempDir::new()?;
    let config = CheckpointerConfig {
        save_every_num_seconds: Some(Duration::from_secs(30)),
        ..CheckpointerConfig::new(dir.path())
    };

    let err = Checkpointer::new(config.clone(), &StaticRank::new(1, 4)?).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
    assert!(err.is_fatal());

    let launched = EnvRankOracle::from_lookup(|name| match name {
        "RANK" => Some("0".to_string()),
        "WORLD_SIZE" => Some("8".to_string()),
        _ => None,
    })?;
    assert!(Checkpointer::new(config.clone(), &launched).is_err());

    assert!(Checkpointer::new(config, &SingleProcess).is_ok());
    Ok(())
}
