//! Poll engine
//!
//! Fetches one snapshot per configured account from the registered provider
//! adapters, normalizes it and maintains the authoritative in-memory map.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          PollEngine                          │
//! │                                                              │
//! │  run(token) ── tick ──▶ refresh_all(token)                   │
//! │                            │                                 │
//! │             ┌──────────────┼──────────────┐   one task per   │
//! │             ▼              ▼              ▼   account        │
//! │        fetch+normalize fetch+normalize fetch+normalize       │
//! │             └──────────────┼──────────────┘                  │
//! │                            ▼   barrier (all senders dropped) │
//! │                 merge under write lock ──▶ subscriber        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every account always gets an entry: missing adapters, adapter errors,
//! timeouts and panicked fetch tasks become error snapshots instead of
//! aborting the cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::normalize::normalize_snapshot;
use super::providers::ProviderAdapter;
use crate::error::{Error, Result};
use crate::models::{Account, ModelNormalizationConfig, Snapshot};

// ============================================================================
// Constants
// ============================================================================

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum polling interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default per-fetch time budget
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Diagnostic listing declared metrics a provider did not report
pub const MISSING_METRICS_DIAGNOSTIC: &str = "widget_missing_metrics";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the poll engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between poll cycles (minimum 5s)
    pub poll_interval: Duration,
    /// Budget for a single adapter fetch
    pub fetch_timeout: Duration,
    /// Passed to the normalizer for every successful fetch
    pub model_normalization: ModelNormalizationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            model_normalization: ModelNormalizationConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_model_normalization(mut self, cfg: ModelNormalizationConfig) -> Self {
        self.model_normalization = cfg;
        self
    }

    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        Self {
            poll_interval: self.poll_interval.max(MIN_POLL_INTERVAL),
            fetch_timeout: if self.fetch_timeout.is_zero() {
                DEFAULT_FETCH_TIMEOUT
            } else {
                self.fetch_timeout
            },
            model_normalization: self.model_normalization.validate(),
        }
    }
}

// ============================================================================
// Engine State (Internal)
// ============================================================================

/// Subscriber invoked once per completed cycle
pub type UpdateCallback = Arc<dyn Fn(HashMap<String, Snapshot>) + Send + Sync>;

#[derive(Default)]
struct EngineState {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    accounts: Vec<Account>,
    snapshots: HashMap<String, Snapshot>,
    /// Cycle that produced each entry in `snapshots`
    snapshot_cycles: HashMap<String, u64>,
    subscriber: Option<UpdateCallback>,
}

struct EngineInner {
    config: EngineConfig,
    state: RwLock<EngineState>,
    next_cycle: AtomicU64,
    /// Parent of refreshes spawned by `add_account`
    background: CancellationToken,
}

// ============================================================================
// Poll Engine
// ============================================================================

/// Cheaply cloneable handle to a shared poll engine
#[derive(Clone)]
pub struct PollEngine {
    inner: Arc<EngineInner>,
}

impl PollEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: config.validate(),
                state: RwLock::new(EngineState::default()),
                next_cycle: AtomicU64::new(1),
                background: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register an adapter; replaces any adapter with the same ID
    pub async fn register_provider(&self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.id().to_string();
        log::debug!("[engine] Registered provider {}", id);
        self.inner.state.write().await.providers.insert(id, adapter);
    }

    /// Replace the configured accounts (duplicate IDs keep the first entry)
    pub async fn set_accounts(&self, accounts: Vec<Account>) {
        let mut unique: Vec<Account> = Vec::with_capacity(accounts.len());
        for account in accounts {
            if unique.iter().any(|a| a.id == account.id) {
                log::warn!("[engine] Ignoring duplicate account {}", account.id);
                continue;
            }
            unique.push(account);
        }
        self.inner.state.write().await.accounts = unique;
    }

    /// Add an account, or update the credential of an existing one, then
    /// refresh in the background
    pub async fn add_account(&self, account: Account) {
        {
            let mut state = self.inner.state.write().await;
            match state.accounts.iter_mut().find(|a| a.id == account.id) {
                Some(existing) => {
                    log::debug!("[engine] Updating credential for {}", account.id);
                    existing.credential_ref = account.credential_ref;
                }
                None => {
                    log::info!("[engine] Added account {} ({})", account.id, account.provider_id);
                    state.accounts.push(account);
                }
            }
        }

        let engine = self.clone();
        let token = self.inner.background.child_token();
        tokio::spawn(async move {
            if let Err(e) = engine.refresh_all(&token).await {
                log::debug!("[engine] Out-of-band refresh discarded: {}", e);
            }
        });
    }

    /// Register the single update subscriber (last writer wins)
    pub async fn on_update<F>(&self, callback: F)
    where
        F: Fn(HashMap<String, Snapshot>) + Send + Sync + 'static,
    {
        self.inner.state.write().await.subscriber = Some(Arc::new(callback));
    }

    /// Copy of the current snapshot map
    pub async fn snapshots(&self) -> HashMap<String, Snapshot> {
        self.inner.state.read().await.snapshots.clone()
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.inner.state.read().await.accounts.clone()
    }

    /// Fetch every configured account concurrently and merge the results.
    ///
    /// Returns `Error::Cancelled` (and merges nothing) if `ctx` is cancelled
    /// before every fetch has completed. Fetches already in flight keep
    /// running until they finish or hit the fetch timeout.
    pub async fn refresh_all(&self, ctx: &CancellationToken) -> Result<()> {
        let cycle = self.inner.next_cycle.fetch_add(1, Ordering::SeqCst);
        let (accounts, providers) = {
            let state = self.inner.state.read().await;
            (state.accounts.clone(), state.providers.clone())
        };
        log::debug!("[engine] Cycle {} fetching {} accounts", cycle, accounts.len());

        let fetch_timeout = self.inner.config.fetch_timeout;
        let (tx, mut rx) = mpsc::channel::<(String, Snapshot)>(accounts.len().max(1));

        for account in &accounts {
            let adapter = providers.get(&account.provider_id).cloned();
            let account = account.clone();
            let tx = tx.clone();
            let token = ctx.child_token();
            let cfg = self.inner.config.model_normalization.clone();
            tokio::spawn(async move {
                let snapshot = fetch_account(adapter, &account, fetch_timeout, &token, &cfg).await;
                // The receiver is gone when the cycle was cancelled.
                let _ = tx.send((account.id, snapshot)).await;
            });
        }
        drop(tx);

        // Barrier: the channel closes once every task has sent or exited.
        let mut results: HashMap<String, Snapshot> = HashMap::with_capacity(accounts.len());
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    log::debug!("[engine] Cycle {} cancelled before completion", cycle);
                    return Err(Error::Cancelled);
                }
                received = rx.recv() => match received {
                    Some((account_id, snapshot)) => {
                        results.insert(account_id, snapshot);
                    }
                    None => break,
                },
            }
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for account in &accounts {
            if !results.contains_key(&account.id) {
                log::warn!("[engine] Fetch task for {} ended without a result", account.id);
                results.insert(
                    account.id.clone(),
                    Snapshot::error(&account.provider_id, &account.id, "fetch task aborted"),
                );
            }
        }

        let (merged, subscriber) = {
            let mut state = self.inner.state.write().await;
            let EngineState {
                accounts: configured,
                snapshots,
                snapshot_cycles,
                subscriber,
                ..
            } = &mut *state;

            for (account_id, snapshot) in results {
                let newer = snapshot_cycles
                    .get(&account_id)
                    .map_or(true, |previous| *previous <= cycle);
                if newer {
                    snapshots.insert(account_id.clone(), snapshot);
                    snapshot_cycles.insert(account_id, cycle);
                }
            }
            snapshots.retain(|id, _| configured.iter().any(|a| &a.id == id));
            snapshot_cycles.retain(|id, _| configured.iter().any(|a| &a.id == id));

            (snapshots.clone(), subscriber.clone())
        };

        log::debug!("[engine] Cycle {} merged {} snapshots", cycle, merged.len());
        if let Some(callback) = subscriber {
            callback(merged);
        }
        Ok(())
    }

    /// Refresh immediately, then on every tick until `ctx` is cancelled
    pub async fn run(&self, ctx: CancellationToken) {
        let period = self.inner.config.poll_interval;
        log::info!("[engine] Starting poll loop with {}s interval", period.as_secs());

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_all(&ctx).await {
                        log::debug!("[engine] Poll cycle discarded: {}", e);
                    }
                }
            }
        }

        log::info!("[engine] Poll loop stopped");
    }

    /// Cancel refreshes spawned by `add_account`
    pub fn shutdown(&self) {
        self.inner.background.cancel();
    }
}

/// Fetch and normalize one account, bounded only by `fetch_timeout`
async fn fetch_account(
    adapter: Option<Arc<dyn ProviderAdapter>>,
    account: &Account,
    fetch_timeout: Duration,
    ctx: &CancellationToken,
    cfg: &ModelNormalizationConfig,
) -> Snapshot {
    let Some(adapter) = adapter else {
        return Snapshot::error(
            &account.provider_id,
            &account.id,
            format!("no adapter registered for provider '{}'", account.provider_id),
        );
    };

    match tokio::time::timeout(fetch_timeout, adapter.fetch(ctx, account)).await {
        Err(_) => {
            log::warn!("[engine] Fetch for {} timed out", account.id);
            Snapshot::error(
                &account.provider_id,
                &account.id,
                format!("fetch timed out after {}s", fetch_timeout.as_secs_f64()),
            )
        }
        Ok(Err(e)) => {
            log::warn!("[engine] Fetch for {} failed: {}", account.id, e);
            Snapshot::error(&account.provider_id, &account.id, e.to_string()).with_status(e.status())
        }
        Ok(Ok(mut snapshot)) => {
            snapshot.account_id = account.id.clone();
            if snapshot.provider_id.is_empty() {
                snapshot.provider_id = account.provider_id.clone();
            }
            let mut snapshot = normalize_snapshot(snapshot, cfg);
            record_missing_metrics(&mut snapshot, adapter.declared_metrics());
            snapshot
        }
    }
}

/// Note declared metric keys that the snapshot does not carry
pub fn record_missing_metrics(snapshot: &mut Snapshot, declared: &[&str]) {
    let mut missing: Vec<&str> = declared
        .iter()
        .copied()
        .filter(|key| !snapshot.metrics.contains_key(*key))
        .collect();
    if missing.is_empty() {
        return;
    }
    missing.sort_unstable();
    missing.dedup();
    snapshot
        .diagnostics
        .insert(MISSING_METRICS_DIAGNOSTIC.to_string(), missing.join(","));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metric, SnapshotStatus};
    use crate::services::providers::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    struct StaticAdapter {
        id: &'static str,
    }

    #[async_trait]
    impl ProviderAdapter for StaticAdapter {
        fn id(&self) -> &str {
            self.id
        }

        fn declared_metrics(&self) -> &[&'static str] {
            &["today_api_cost", "session_percent"]
        }

        async fn fetch(
            &self,
            _ctx: &CancellationToken,
            account: &Account,
        ) -> std::result::Result<Snapshot, ProviderError> {
            Ok(Snapshot::new(self.id, &account.id)
                .with_status(SnapshotStatus::Ok)
                .with_metric("today_api_cost", Metric::used(1.5, "USD", "today")))
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl ProviderAdapter for FailingAdapter {
        fn id(&self) -> &str {
            "failing"
        }

        async fn fetch(
            &self,
            _ctx: &CancellationToken,
            _account: &Account,
        ) -> std::result::Result<Snapshot, ProviderError> {
            Err(ProviderError::Unauthorized("key revoked".to_string()))
        }
    }

    struct SlowAdapter;

    #[async_trait]
    impl ProviderAdapter for SlowAdapter {
        fn id(&self) -> &str {
            "slow"
        }

        async fn fetch(
            &self,
            _ctx: &CancellationToken,
            account: &Account,
        ) -> std::result::Result<Snapshot, ProviderError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Snapshot::new("slow", &account.id))
        }
    }

    struct PanickingAdapter;

    #[async_trait]
    impl ProviderAdapter for PanickingAdapter {
        fn id(&self) -> &str {
            "panicking"
        }

        async fn fetch(
            &self,
            _ctx: &CancellationToken,
            _account: &Account,
        ) -> std::result::Result<Snapshot, ProviderError> {
            panic!("adapter bug");
        }
    }

    fn fast_engine() -> PollEngine {
        PollEngine::new(EngineConfig::default().with_fetch_timeout(Duration::from_millis(100)))
    }

    #[test]
    fn test_config_validate() {
        let config = EngineConfig::default()
            .with_poll_interval(Duration::from_secs(1))
            .with_fetch_timeout(Duration::ZERO)
            .validate();
        assert_eq!(config.poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(config.fetch_timeout, DEFAULT_FETCH_TIMEOUT);
    }

    #[tokio::test]
    async fn test_refresh_all_yields_one_entry_per_account() {
        let engine = fast_engine();
        engine.register_provider(Arc::new(StaticAdapter { id: "cursor" })).await;
        engine.register_provider(Arc::new(FailingAdapter)).await;
        engine
            .set_accounts(vec![
                Account::new("a", "cursor"),
                Account::new("b", "failing"),
                Account::new("c", "unregistered"),
                Account::new("d", "cursor"),
            ])
            .await;

        engine.refresh_all(&CancellationToken::new()).await.unwrap();
        let snaps = engine.snapshots().await;

        assert_eq!(snaps.len(), 4);
        assert_eq!(snaps["a"].status, SnapshotStatus::Ok);
        assert_eq!(snaps["b"].status, SnapshotStatus::AuthRequired);
        assert!(snaps["b"].message.contains("key revoked"));
        assert_eq!(snaps["c"].status, SnapshotStatus::Error);
        assert!(snaps["c"].message.contains("unregistered"));
        assert_eq!(snaps["d"].account_id, "d");
    }

    #[tokio::test]
    async fn test_timeout_and_panic_become_error_snapshots() {
        let engine = fast_engine();
        engine.register_provider(Arc::new(SlowAdapter)).await;
        engine.register_provider(Arc::new(PanickingAdapter)).await;
        engine
            .set_accounts(vec![Account::new("slow-1", "slow"), Account::new("boom", "panicking")])
            .await;

        engine.refresh_all(&CancellationToken::new()).await.unwrap();
        let snaps = engine.snapshots().await;

        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps["slow-1"].status, SnapshotStatus::Error);
        assert!(snaps["slow-1"].message.starts_with("fetch timed out after"));
        assert_eq!(snaps["boom"].message, "fetch task aborted");
    }

    #[tokio::test]
    async fn test_missing_metrics_diagnostic() {
        let engine = fast_engine();
        engine.register_provider(Arc::new(StaticAdapter { id: "cursor" })).await;
        engine.set_accounts(vec![Account::new("a", "cursor")]).await;
        engine.refresh_all(&CancellationToken::new()).await.unwrap();

        let snaps = engine.snapshots().await;
        assert_eq!(
            snaps["a"].diagnostics.get(MISSING_METRICS_DIAGNOSTIC).map(String::as_str),
            Some("session_percent")
        );
        assert!(snaps["a"].daily_series.contains_key("cost"));
    }

    #[tokio::test]
    async fn test_cancelled_cycle_is_discarded() {
        let engine = fast_engine();
        engine.register_provider(Arc::new(SlowAdapter)).await;
        engine.set_accounts(vec![Account::new("slow-1", "slow")]).await;

        let notified = Arc::new(Mutex::new(0usize));
        let counter = notified.clone();
        engine
            .on_update(move |_| *counter.lock().unwrap() += 1)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let result = engine.refresh_all(&token).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(engine.snapshots().await.is_empty());
        assert_eq!(*notified.lock().unwrap(), 0);
    }

    struct RecordingAdapter {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ProviderAdapter for RecordingAdapter {
        fn id(&self) -> &str {
            "recording"
        }

        async fn fetch(
            &self,
            _ctx: &CancellationToken,
            account: &Account,
        ) -> std::result::Result<Snapshot, ProviderError> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Snapshot::new("recording", &account.id))
        }
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_fetch_finish() {
        let engine =
            PollEngine::new(EngineConfig::default().with_fetch_timeout(Duration::from_secs(2)));
        let finished = Arc::new(AtomicBool::new(false));
        engine
            .register_provider(Arc::new(RecordingAdapter {
                finished: finished.clone(),
            }))
            .await;
        engine.set_accounts(vec![Account::new("r-1", "recording")]).await;

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = engine.refresh_all(&token).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(engine.snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_accounts_drops_removed_accounts() {
        let engine = fast_engine();
        engine.register_provider(Arc::new(StaticAdapter { id: "cursor" })).await;
        engine
            .set_accounts(vec![Account::new("a", "cursor"), Account::new("b", "cursor")])
            .await;
        engine.refresh_all(&CancellationToken::new()).await.unwrap();

        engine.set_accounts(vec![Account::new("b", "cursor")]).await;
        engine.refresh_all(&CancellationToken::new()).await.unwrap();

        let snaps = engine.snapshots().await;
        assert_eq!(snaps.len(), 1);
        assert!(snaps.contains_key("b"));
    }

    #[tokio::test]
    async fn test_add_account_is_idempotent_and_refreshes() {
        let engine = fast_engine();
        engine.register_provider(Arc::new(StaticAdapter { id: "cursor" })).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .on_update(move |snaps| {
                let _ = tx.send(snaps.len());
            })
            .await;

        engine.add_account(Account::new("a", "cursor").with_credential("old")).await;
        let count = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);

        engine.add_account(Account::new("a", "cursor").with_credential("env:NEW_KEY")).await;
        let accounts = engine.accounts().await;
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].credential_ref, "env:NEW_KEY");

        engine.shutdown();
    }

    #[tokio::test]
    async fn test_on_update_last_writer_wins() {
        let engine = fast_engine();
        engine.set_accounts(vec![Account::new("a", "none")]).await;

        let first = Arc::new(Mutex::new(0usize));
        let second = Arc::new(Mutex::new(0usize));
        let f = first.clone();
        let s = second.clone();
        engine.on_update(move |_| *f.lock().unwrap() += 1).await;
        engine.on_update(move |_| *s.lock().unwrap() += 1).await;

        engine.refresh_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let engine = fast_engine();
        engine.register_provider(Arc::new(StaticAdapter { id: "cursor" })).await;
        engine.set_accounts(vec![Account::new("a", "cursor")]).await;

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let engine = engine.clone();
            let token = token.clone();
            async move { engine.run(token).await }
        });

        // The first tick refreshes immediately
        for _ in 0..50 {
            if !engine.snapshots().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.snapshots().await.len(), 1);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
