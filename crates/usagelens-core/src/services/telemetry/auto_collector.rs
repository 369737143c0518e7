//! Periodic collect-then-flush driver

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::pipeline::{FlushResult, Pipeline, DEFAULT_BATCH_SIZE, DEFAULT_MAX_TOTAL};
use super::{CollectOptions, Collector};

/// Lower bound for the collect interval
pub const MIN_COLLECT_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound for the collect interval
pub const MAX_COLLECT_INTERVAL: Duration = Duration::from_secs(20);

/// Default collect interval
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(10);

/// Clamp a requested interval into the 5-20s band.
///
/// Local collection is cheap, so it is never throttled down to the remote
/// poll cadence.
pub fn clamp_collect_interval(requested: Duration) -> Duration {
    requested.clamp(MIN_COLLECT_INTERVAL, MAX_COLLECT_INTERVAL)
}

/// Outcome of one collect + flush pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoCollectReport {
    /// Events newly staged in the spool by all collectors
    pub collected: usize,
    /// Collected events that were already pending or stored
    pub skipped: usize,
    pub flush: FlushResult,
    /// Collector errors and flush warnings; never fatal
    pub warnings: Vec<String>,
}

/// Runs every registered collector, then drains the pipeline
pub struct AutoCollector {
    collectors: Vec<Arc<dyn Collector>>,
    pipeline: Arc<Pipeline>,
    options: CollectOptions,
    batch_size: usize,
    max_total: usize,
}

impl AutoCollector {
    pub fn new(pipeline: Arc<Pipeline>, options: CollectOptions) -> Self {
        Self {
            collectors: Vec::new(),
            pipeline,
            options,
            batch_size: DEFAULT_BATCH_SIZE,
            max_total: DEFAULT_MAX_TOTAL,
        }
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn with_flush_limits(mut self, batch_size: usize, max_total: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.max_total = max_total.max(1);
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Collect from every collector, spool what is new and drain once
    pub async fn run_once(&self, ctx: &CancellationToken) -> AutoCollectReport {
        let mut report = AutoCollectReport::default();

        for collector in &self.collectors {
            if ctx.is_cancelled() {
                return report;
            }
            let system = collector.system().to_string();
            match collector.collect(ctx, &self.options).await {
                Ok(events) => match self.pipeline.stage(&events).await {
                    Ok(count) => {
                        log::debug!(
                            "[telemetry:auto] {} collected {} events, {} new",
                            system,
                            events.len(),
                            count
                        );
                        report.collected += count;
                        report.skipped += events.len() - count;
                    }
                    Err(e) => report
                        .warnings
                        .push(format!("{}: spool write failed: {}", system, e)),
                },
                Err(e) => report.warnings.push(format!("{}: {}", system, e)),
            }
        }

        match self.pipeline.drain(ctx, self.batch_size, self.max_total).await {
            Ok(flush) => {
                if flush.failed > 0 {
                    report
                        .warnings
                        .push(format!("flush: {} events failed to ingest", flush.failed));
                }
                report.flush = flush;
            }
            Err(e) => report.warnings.push(format!("flush: {}", e)),
        }

        report
    }

    /// Collect and flush on every tick until `ctx` is cancelled.
    ///
    /// `interval` is clamped with `clamp_collect_interval`; every report,
    /// including warnings, goes to `callback`.
    pub async fn run<F>(&self, ctx: CancellationToken, interval: Duration, callback: F)
    where
        F: Fn(&AutoCollectReport) + Send + Sync,
    {
        let period = clamp_collect_interval(interval);
        log::info!(
            "[telemetry:auto] Starting auto-collect with {}s interval ({} collectors)",
            period.as_secs(),
            self.collectors.len()
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_once(&ctx).await;
                    for warning in &report.warnings {
                        log::warn!("[telemetry:auto] {}", warning);
                    }
                    callback(&report);
                }
            }
        }

        log::info!("[telemetry:auto] Auto-collect stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::services::telemetry::{Spool, TelemetryEvent, TelemetryStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedCollector;

    #[async_trait]
    impl Collector for FixedCollector {
        fn system(&self) -> &str {
            "fixed"
        }

        async fn collect(
            &self,
            _ctx: &CancellationToken,
            _options: &CollectOptions,
        ) -> Result<Vec<TelemetryEvent>> {
            Ok((0..3)
                .map(|seq| TelemetryEvent::new("fixed", "cursor", "s1", seq, Utc::now()))
                .collect())
        }
    }

    struct BrokenCollector;

    #[async_trait]
    impl Collector for BrokenCollector {
        fn system(&self) -> &str {
            "broken"
        }

        async fn collect(
            &self,
            _ctx: &CancellationToken,
            _options: &CollectOptions,
        ) -> Result<Vec<TelemetryEvent>> {
            Err(Error::internal("database is locked"))
        }
    }

    async fn setup() -> (Arc<Pipeline>, TempDir) {
        let dir = TempDir::new().unwrap();
        let spool = Spool::open(dir.path().join("spool")).unwrap();
        let store = TelemetryStore::open(dir.path().join("store.db")).await.unwrap();
        (Arc::new(Pipeline::new(spool, store)), dir)
    }

    #[test]
    fn test_clamp_collect_interval() {
        assert_eq!(clamp_collect_interval(Duration::from_secs(1)), MIN_COLLECT_INTERVAL);
        assert_eq!(clamp_collect_interval(Duration::from_secs(12)), Duration::from_secs(12));
        assert_eq!(clamp_collect_interval(Duration::from_secs(300)), MAX_COLLECT_INTERVAL);
    }

    #[tokio::test]
    async fn test_run_once_reports_errors_and_keeps_going() {
        let (pipeline, _dir) = setup().await;
        let auto = AutoCollector::new(pipeline.clone(), CollectOptions::new())
            .with_collector(Arc::new(BrokenCollector))
            .with_collector(Arc::new(FixedCollector));

        let report = auto.run_once(&CancellationToken::new()).await;

        assert_eq!(report.collected, 3);
        assert_eq!(report.flush.ingested, 3);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("broken:"));

        let again = auto.run_once(&CancellationToken::new()).await;
        assert_eq!(again.collected, 0);
        assert_eq!(again.skipped, 3);
        assert_eq!(again.flush.processed, 0);
        assert_eq!(pipeline.store().event_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_repeated_ticks_keep_spool_bounded() {
        let (pipeline, _dir) = setup().await;
        let auto = AutoCollector::new(pipeline.clone(), CollectOptions::new())
            .with_collector(Arc::new(FixedCollector))
            .with_flush_limits(1, 2);
        let token = CancellationToken::new();

        let mut pending = Vec::new();
        for _ in 0..5 {
            auto.run_once(&token).await;
            pending.push(pipeline.spool().pending().unwrap());
        }
        assert_eq!(pending, vec![1, 0, 0, 0, 0]);
        assert_eq!(pipeline.store().event_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_repeated_ticks_with_closed_store_keep_spool_bounded() {
        let (pipeline, _dir) = setup().await;
        pipeline.store().close().await;
        let auto = AutoCollector::new(pipeline.clone(), CollectOptions::new())
            .with_collector(Arc::new(FixedCollector))
            .with_flush_limits(1, 2);
        let token = CancellationToken::new();

        for _ in 0..5 {
            let report = auto.run_once(&token).await;
            assert!(report.flush.failed > 0);
            assert!(pipeline.spool().pending().unwrap() <= 3);
        }
    }

    #[tokio::test]
    async fn test_run_invokes_callback_until_cancelled() {
        let (pipeline, _dir) = setup().await;
        let auto = Arc::new(
            AutoCollector::new(pipeline, CollectOptions::new())
                .with_collector(Arc::new(FixedCollector)),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let auto = auto.clone();
            let calls = calls.clone();
            let token = token.clone();
            async move {
                auto.run(token, Duration::from_secs(1), move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .await
            }
        });

        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        // Interval is clamped to 5s, so only the immediate tick ran
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
