//! Runtime Core - Foundation for the checkpoint lifecycle runtime
//!
//! Provides core types, error handling, configuration, rank detection and
//! logging helpers shared by the storage and checkpoint crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod rank;
pub mod types;

pub use config::CheckpointerConfig;
pub use error::{Error, Result};
pub use rank::{EnvRankOracle, RankOracle, SingleProcess, StaticRank};
pub use types::*;
