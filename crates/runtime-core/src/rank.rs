//! Rank detection for multi-process training
//!
//! The checkpointer only needs two answers from the distributed runtime:
//! whether this is a multi-process run and, if so, which rank we are.

use serde::{Deserialize, Serialize};

use crate::{Error, Rank, Result};

/// Source of the local process rank
pub trait RankOracle: Send + Sync {
    /// Whether this process is part of a multi-process run
    fn is_distributed(&self) -> bool;

    /// Rank of this process within the run
    fn rank(&self) -> Rank;

    /// Rank to use for checkpointing; single-process runs are always 0
    fn effective_rank(&self) -> Rank {
        if self.is_distributed() {
            self.rank()
        } else {
            0
        }
    }

    /// Check if this is the primary process
    fn is_primary(&self) -> bool {
        self.effective_rank() == 0
    }
}

/// A plain single-process run
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl RankOracle for SingleProcess {
    fn is_distributed(&self) -> bool {
        false
    }

    fn rank(&self) -> Rank {
        0
    }
}

/// Fixed rank assignment, e.g. handed out by a launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRank {
    /// This worker's rank (0-indexed)
    pub rank: Rank,
    /// Total number of workers
    pub world_size: usize,
}

impl StaticRank {
    pub fn new(rank: Rank, world_size: usize) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(Error::InvalidConfig {
                message: format!("rank {} is outside world of size {}", rank, world_size),
            });
        }
        Ok(Self { rank, world_size })
    }
}

impl RankOracle for StaticRank {
    fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    fn rank(&self) -> Rank {
        self.rank
    }
}

/// Reads `RANK` and `WORLD_SIZE` as set by common distributed launchers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvRankOracle {
    inner: StaticRank,
}

impl EnvRankOracle {
    pub const RANK_VAR: &'static str = "RANK";
    pub const WORLD_SIZE_VAR: &'static str = "WORLD_SIZE";

    /// Detect from the process environment. Missing variables mean a
    /// single-process run.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Detect using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: &str, default: usize| -> Result<usize> {
            match lookup(name) {
                None => Ok(default),
                Some(raw) => raw.trim().parse().map_err(|_| Error::InvalidConfig {
                    message: format!("{} must be a non-negative integer, got {:?}", name, raw),
                }),
            }
        };

        let world_size = parse(Self::WORLD_SIZE_VAR, 1)?;
        let rank = parse(Self::RANK_VAR, 0)?;
        Ok(Self {
            inner: StaticRank::new(rank, world_size)?,
        })
    }

    pub fn world_size(&self) -> usize {
        self.inner.world_size
    }
}

impl RankOracle for EnvRankOracle {
    fn is_distributed(&self) -> bool {
        self.inner.is_distributed()
    }

    fn rank(&self) -> Rank {
        self.inner.rank()
    }
}
