//! Canonical checkpoint file names
//!
//! `model_state_e<E>_b<B>.pt` and `training_state_e<E>_b<B>.pt`, with a
//! `_w<R>` suffix before the extension when state is sharded by rank.

use regex::Regex;
use runtime_core::{Position, Rank, StateKind};
use std::sync::OnceLock;

/// Numbers are written without padding, so anything with a leading zero
/// (other than `0` itself) was not produced by us.
const NUMBER: &str = r"(0|[1-9][0-9]*)";

fn file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(
            r"^(model_state|training_state)_e{n}_b{n}(?:_w{n})?\.pt$",
            n = NUMBER
        );
        Regex::new(&pattern).expect("checkpoint file pattern is valid")
    })
}

/// A file name that parsed as one of ours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParsedName {
    pub kind: StateKind,
    pub position: Position,
    /// Rank suffix, present only for sharded files
    pub rank: Option<Rank>,
}

/// File name for one half of a checkpoint record
pub fn state_file_name(kind: StateKind, position: Position, shard: Option<Rank>) -> String {
    match shard {
        Some(rank) => format!("{}_{}_w{}.pt", kind.file_stem(), position, rank),
        None => format!("{}_{}.pt", kind.file_stem(), position),
    }
}

/// Parse a bare file name. Anything not produced by [`state_file_name`],
/// including numbers that overflow, yields `None`.
pub fn parse_state_file_name(name: &str) -> Option<ParsedName> {
    let captures = file_pattern().captures(name)?;

    let kind = match &captures[1] {
        "model_state" => StateKind::Model,
        "training_state" => StateKind::Training,
        _ => return None,
    };
    let epochs_completed = captures[2].parse().ok()?;
    let batches_in_epoch_completed = captures[3].parse().ok()?;
    let rank = match captures.get(4) {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };

    Some(ParsedName {
        kind,
        position: Position::new(epochs_completed, batches_in_epoch_completed),
        rank,
    })
}
