//! Read-model stabilizer
//!
//! Keeps the last good snapshot per account when an overlay tick
//! transiently produces an empty one.

use std::collections::HashMap;

use crate::models::{Snapshot, SnapshotStatus};

/// `UNKNOWN` with nothing to show
pub fn is_degraded(snapshot: &Snapshot) -> bool {
    snapshot.status == SnapshotStatus::Unknown
        && snapshot.metrics.is_empty()
        && snapshot.resets.is_empty()
        && snapshot.daily_series.is_empty()
        && snapshot.model_usage.is_empty()
        && snapshot.message.trim().is_empty()
}

/// Merge `current` over `previous`, preferring the previous snapshot only
/// where the current one is degraded and the previous one is not
pub fn stabilize(
    current: &HashMap<String, Snapshot>,
    previous: &HashMap<String, Snapshot>,
) -> HashMap<String, Snapshot> {
    current
        .iter()
        .map(|(id, snapshot)| {
            let kept = match previous.get(id) {
                Some(prev) if is_degraded(snapshot) && !is_degraded(prev) => {
                    log::debug!("[stabilizer] Keeping last good snapshot for {}", id);
                    prev.clone()
                }
                _ => snapshot.clone(),
            };
            (id.clone(), kept)
        })
        .collect()
}

/// Stateful wrapper remembering the last emitted map
#[derive(Debug, Default)]
pub struct ReadModelStabilizer {
    previous: HashMap<String, Snapshot>,
}

impl ReadModelStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stabilize `current` against the last result and remember the output
    pub fn apply(&mut self, current: HashMap<String, Snapshot>) -> HashMap<String, Snapshot> {
        let merged = stabilize(&current, &self.previous);
        self.previous = merged.clone();
        merged
    }

    pub fn previous(&self) -> &HashMap<String, Snapshot> {
        &self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metric;

    fn good(account: &str) -> Snapshot {
        Snapshot::new("cursor", account)
            .with_status(SnapshotStatus::Ok)
            .with_metric("plan_spend", Metric::used(4.0, "USD", "month"))
    }

    fn blank(account: &str) -> Snapshot {
        Snapshot::new("cursor", account)
    }

    fn map(entries: Vec<Snapshot>) -> HashMap<String, Snapshot> {
        entries
            .into_iter()
            .map(|s| (s.account_id.clone(), s))
            .collect()
    }

    #[test]
    fn test_is_degraded() {
        assert!(is_degraded(&blank("a")));
        assert!(!is_degraded(&good("a")));
        assert!(!is_degraded(&blank("a").with_message("syncing")));
        assert!(!is_degraded(&Snapshot::error("cursor", "a", "boom")));
    }

    #[test]
    fn test_degraded_current_falls_back_to_previous() {
        let previous = map(vec![good("a")]);
        let current = map(vec![blank("a")]);

        let merged = stabilize(&current, &previous);
        assert_eq!(merged["a"], previous["a"]);
    }

    #[test]
    fn test_healthy_current_always_wins() {
        let previous = map(vec![good("a")]);
        let current = map(vec![Snapshot::error("cursor", "a", "HTTP 500")]);

        let merged = stabilize(&current, &previous);
        assert_eq!(merged["a"], current["a"]);
    }

    #[test]
    fn test_degraded_without_history_is_kept() {
        let current = map(vec![blank("a"), good("b")]);
        let merged = stabilize(&current, &map(vec![blank("a")]));
        assert_eq!(merged, current);
    }

    #[test]
    fn test_stateful_apply_remembers_last_good() {
        let mut stabilizer = ReadModelStabilizer::new();
        let first = map(vec![good("a")]);
        stabilizer.apply(first.clone());

        let second = stabilizer.apply(map(vec![blank("a")]));
        assert_eq!(second["a"], first["a"]);

        let third = stabilizer.apply(map(vec![blank("a")]));
        assert_eq!(third["a"], first["a"]);
        assert_eq!(stabilizer.previous().len(), 1);
    }
}
