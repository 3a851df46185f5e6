//! Retention policy: which checkpoints survive a sweep

use runtime_core::Position;
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

/// Count- and age-based retention. A position survives if either policy
/// keeps it; disabled policies keep nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// Keep this many of the most recent positions
    pub keep_most_recent_by_count: Option<usize>,

    /// Keep positions whose newest file is at most this old
    pub keep_most_recent_by_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.keep_most_recent_by_count.is_some() || self.keep_most_recent_by_age.is_some()
    }

    /// Positions to keep, given each candidate with its newest modification time
    pub fn survivors(&self, checkpoints: &[(Position, SystemTime)], now: SystemTime) -> BTreeSet<Position> {
        let mut keep = BTreeSet::new();

        if let Some(count) = self.keep_most_recent_by_count {
            let by_recency: BTreeSet<Position> = checkpoints.iter().map(|(p, _)| *p).collect();
            keep.extend(by_recency.into_iter().rev().take(count));
        }

        if let Some(max_age) = self.keep_most_recent_by_age {
            for (position, modified) in checkpoints {
                // Clock skew can put mtimes in the future; those count as fresh
                let age = now.duration_since(*modified).unwrap_or(Duration::ZERO);
                if age <= max_age {
                    keep.insert(*position);
                }
            }
        }

        keep
    }

    /// Positions to delete: everything not kept
    pub fn expired(&self, checkpoints: &[(Position, SystemTime)], now: SystemTime) -> Vec<Position> {
        let keep = self.survivors(checkpoints, now);
        let mut expired: Vec<Position> = checkpoints
            .iter()
            .map(|(p, _)| *p)
            .filter(|p| !keep.contains(p))
            .collect();
        expired.sort();
        expired.dedup();
        expired
    }
}
