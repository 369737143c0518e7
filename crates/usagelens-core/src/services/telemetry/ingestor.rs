//! Persists poll-engine snapshots into the telemetry store

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::store::{IngestOutcome, TelemetryStore};
use crate::error::{Error, Result};
use crate::models::Snapshot;

/// Budget for one ingest call
pub const INGEST_TIMEOUT: Duration = Duration::from_millis(1200);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub ingested: usize,
    pub deduped: usize,
    pub failed: usize,
}

/// Writes the engine's snapshot map as a stream independent of collected
/// telemetry
#[derive(Clone)]
pub struct QuotaSnapshotIngestor {
    store: TelemetryStore,
    timeout: Duration,
}

impl QuotaSnapshotIngestor {
    pub fn new(store: TelemetryStore) -> Self {
        Self {
            store,
            timeout: INGEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    /// Store every snapshot, bounded by the ingest budget.
    ///
    /// Individual write failures are counted, not returned. The call fails
    /// only on timeout or cancellation.
    pub async fn ingest(
        &self,
        ctx: &CancellationToken,
        snapshots: &HashMap<String, Snapshot>,
    ) -> Result<IngestSummary> {
        let work = self.ingest_all(snapshots);

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, work) => match result {
                Ok(summary) => Ok(summary),
                Err(_) => {
                    log::warn!(
                        "[telemetry:ingest] Snapshot ingest exceeded {:?}",
                        self.timeout
                    );
                    Err(Error::timeout(format!(
                        "snapshot ingest exceeded {}ms",
                        self.timeout.as_millis()
                    )))
                }
            },
        }
    }

    async fn ingest_all(&self, snapshots: &HashMap<String, Snapshot>) -> IngestSummary {
        let mut summary = IngestSummary::default();

        // Stable order keeps partial progress predictable under timeout
        let mut ids: Vec<&String> = snapshots.keys().collect();
        ids.sort();

        for id in ids {
            let snapshot = &snapshots[id];
            match self.store.ingest_snapshot(snapshot).await {
                Ok(IngestOutcome::Ingested) => summary.ingested += 1,
                Ok(IngestOutcome::Deduped) => summary.deduped += 1,
                Err(e) => {
                    log::warn!("[telemetry:ingest] Failed to store snapshot for {}: {}", id, e);
                    summary.failed += 1;
                }
            }
        }

        log::debug!(
            "[telemetry:ingest] Snapshots ingested={} deduped={} failed={}",
            summary.ingested,
            summary.deduped,
            summary.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metric, SnapshotStatus};
    use tempfile::TempDir;

    async fn setup() -> (QuotaSnapshotIngestor, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = TelemetryStore::open(dir.path().join("store.db")).await.unwrap();
        (QuotaSnapshotIngestor::new(store), dir)
    }

    fn snapshots() -> HashMap<String, Snapshot> {
        let mut map = HashMap::new();
        map.insert(
            "cursor-main".to_string(),
            Snapshot::new("cursor", "cursor-main")
                .with_status(SnapshotStatus::Ok)
                .with_metric("plan_spend", Metric::used(12.5, "USD", "month")),
        );
        map.insert(
            "openai-work".to_string(),
            Snapshot::error("openai", "openai-work", "HTTP 500"),
        );
        map
    }

    #[tokio::test]
    async fn test_ingest_then_dedupe() {
        let (ingestor, _dir) = setup().await;
        let token = CancellationToken::new();
        let snaps = snapshots();

        let first = ingestor.ingest(&token, &snaps).await.unwrap();
        assert_eq!(first.ingested, 2);
        assert_eq!(first.deduped, 0);

        let second = ingestor.ingest(&token, &snaps).await.unwrap();
        assert_eq!(second.ingested, 0);
        assert_eq!(second.deduped, 2);
        assert_eq!(ingestor.store().snapshot_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_ingest() {
        let (ingestor, _dir) = setup().await;
        let token = CancellationToken::new();
        token.cancel();

        let err = ingestor.ingest(&token, &snapshots()).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_ingest_times_out_while_store_is_locked() {
        let (ingestor, _dir) = setup().await;
        let ingestor = ingestor.with_timeout(Duration::from_millis(50));

        // Writers wait on the busy timeout while this transaction is open
        let mut lock = ingestor.store().database().pool.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *lock)
            .await
            .unwrap();

        let err = ingestor
            .ingest(&CancellationToken::new(), &snapshots())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        sqlx::query("ROLLBACK").execute(&mut *lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let (ingestor, _dir) = setup().await;
        ingestor.store().close().await;

        let summary = ingestor
            .ingest(&CancellationToken::new(), &snapshots())
            .await
            .unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.ingested, 0);
    }
}
