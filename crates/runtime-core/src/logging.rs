//! Logging helpers: subscriber setup, rank-aware messages and one-time warnings

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::Rank;

/// Keys that have already produced a warning in this process
static WARNED: Mutex<Vec<&'static str>> = parking_lot::const_mutex(Vec::new());

/// Install a formatting subscriber honouring `RUST_LOG`, falling back to
/// `default_filter`. Safe to call more than once.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Emit `message` as a warning the first time `key` is seen; returns whether
/// it was emitted.
pub fn warn_once(key: &'static str, message: &str) -> bool {
    let mut warned = WARNED.lock();
    if warned.contains(&key) {
        return false;
    }
    warned.push(key);
    drop(warned);

    warn!(key = key, "{}", message);
    true
}

/// Prefix a message with the rank of the process that logged it
pub fn rank_prefixed_message(message: &str, rank: Option<Rank>) -> String {
    match rank {
        Some(rank) => format!("[rank: {}] {}", rank, message),
        None => message.to_string(),
    }
}

/// Log at info level on the primary rank only
pub fn rank_zero_info(rank: Rank, message: &str) {
    if rank == 0 {
        info!(rank = rank, "{}", message);
    }
}

/// Log at warn level on the primary rank only
pub fn rank_zero_warn(rank: Rank, message: &str) {
    if rank == 0 {
        warn!(rank = rank, "{}", message);
    }
}

/// Render metrics for a progress line: `"loss: 0.1234, acc: 0.9000 ||"`.
///
/// Metrics whose names start with `_` are hidden.
pub fn describe_metrics(metrics: &BTreeMap<String, f64>) -> String {
    if metrics.keys().any(|name| name.starts_with('_')) {
        warn_once(
            "progress_hides_underscored_metrics",
            "Metrics with names beginning with \"_\" will not be shown in the progress description.",
        );
    }

    let parts: Vec<String> = metrics
        .iter()
        .filter(|(name, _)| !name.starts_with('_'))
        .map(|(name, value)| format!("{}: {:.4}", name, value))
        .collect();
    format!("{} ||", parts.join(", "))
}
