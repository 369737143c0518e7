//! Spool-to-store flushing
//!
//! `stage` spools only events that are neither pending nor stored yet;
//! `flush` moves at most one batch from the spool into the store;
//! `drain` repeats it with a fixed batch size until the overall cap is hit or
//! a batch makes no forward progress.

use std::collections::HashSet;
use std::ops::AddAssign;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::spool::Spool;
use super::store::{IngestOutcome, TelemetryStore};
use super::TelemetryEvent;
use crate::error::Result;

/// Default events per flush batch
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default overall cap for one drain
pub const DEFAULT_MAX_TOTAL: usize = 100_000;

/// Outcome of draining spooled events into the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushResult {
    pub processed: usize,
    pub ingested: usize,
    pub deduped: usize,
    pub failed: usize,
}

impl FlushResult {
    /// Whether any event left the spool successfully
    pub fn made_progress(&self) -> bool {
        self.ingested > 0 || self.deduped > 0
    }
}

impl AddAssign for FlushResult {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.ingested += other.ingested;
        self.deduped += other.deduped;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for FlushResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={} ingested={} deduped={} failed={}",
            self.processed, self.ingested, self.deduped, self.failed
        )
    }
}

/// Drains the spool into the store
pub struct Pipeline {
    spool: Spool,
    store: TelemetryStore,
    /// Serialises peek/commit pairs
    flush_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(spool: Spool, store: TelemetryStore) -> Self {
        Self {
            spool,
            store,
            flush_lock: Mutex::new(()),
        }
    }

    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    /// Durably stage events as they are
    pub fn enqueue(&self, events: &[TelemetryEvent]) -> Result<usize> {
        self.spool.append(events)?;
        Ok(events.len())
    }

    /// Spool the events that are not already pending or stored.
    ///
    /// Collectors re-read whole sessions on every pass, so most of what they
    /// return is already known. When the store cannot be queried only the
    /// spool is consulted. Returns the number of events staged.
    pub async fn stage(&self, events: &[TelemetryEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let _guard = self.flush_lock.lock().await;

        let mut seen = self.spool.pending_fingerprints()?;
        let mut fresh = Vec::with_capacity(events.len());
        for event in events {
            let fingerprint = event.fingerprint();
            if seen.insert(fingerprint.clone()) {
                fresh.push((fingerprint, event));
            }
        }

        let candidates: Vec<String> = fresh.iter().map(|(fp, _)| fp.clone()).collect();
        let stored = match self.store.stored_fingerprints(&candidates).await {
            Ok(stored) => stored,
            Err(e) => {
                log::debug!(
                    "[telemetry:pipeline] Store lookup failed, filtering on spool only: {}",
                    e
                );
                HashSet::new()
            }
        };

        let staged: Vec<TelemetryEvent> = fresh
            .into_iter()
            .filter(|(fp, _)| !stored.contains(fp))
            .map(|(_, event)| event.clone())
            .collect();

        self.spool.append(&staged)?;
        if staged.len() < events.len() {
            log::debug!(
                "[telemetry:pipeline] Staged {} of {} events, rest already known",
                staged.len(),
                events.len()
            );
        }
        Ok(staged.len())
    }

    /// Ingest up to `batch_limit` spooled events.
    ///
    /// Cancellation is checked between events; processed events are
    /// committed and the partial result returned.
    pub async fn flush(&self, ctx: &CancellationToken, batch_limit: usize) -> Result<FlushResult> {
        let _guard = self.flush_lock.lock().await;

        let batch = self.spool.peek(batch_limit)?;
        let mut result = FlushResult::default();
        let mut succeeded = Vec::with_capacity(batch.len());

        for entry in &batch {
            if ctx.is_cancelled() {
                log::debug!(
                    "[telemetry:pipeline] Flush cancelled after {} events",
                    result.processed
                );
                break;
            }
            match self.store.ingest_event(&entry.event).await {
                Ok(IngestOutcome::Ingested) => {
                    result.ingested += 1;
                    succeeded.push(true);
                }
                Ok(IngestOutcome::Deduped) => {
                    result.deduped += 1;
                    succeeded.push(true);
                }
                Err(e) => {
                    log::warn!(
                        "[telemetry:pipeline] Failed to ingest {}: {}",
                        entry.event.fingerprint(),
                        e
                    );
                    result.failed += 1;
                    succeeded.push(false);
                }
            }
            result.processed += 1;
        }

        self.spool.commit(&batch[..succeeded.len()], &succeeded)?;

        if result.processed > 0 {
            log::debug!("[telemetry:pipeline] Flushed batch: {}", result);
        }
        Ok(result)
    }

    /// Flush repeatedly in `batch_size` chunks up to `max_total` events.
    ///
    /// Stops early once a batch makes no progress, so a persistently failing
    /// store cannot loop forever.
    pub async fn drain(
        &self,
        ctx: &CancellationToken,
        batch_size: usize,
        max_total: usize,
    ) -> Result<FlushResult> {
        let mut total = FlushResult::default();

        while total.processed < max_total && !ctx.is_cancelled() {
            let limit = batch_size.min(max_total - total.processed);
            let batch = self.flush(ctx, limit).await?;
            total += batch;
            if !batch.made_progress() {
                break;
            }
        }

        if total.processed > 0 {
            log::info!("[telemetry:pipeline] Drained spool: {}", total);
        }
        Ok(total)
    }
}
