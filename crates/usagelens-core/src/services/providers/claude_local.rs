//! Claude Code local usage provider
//!
//! Builds a snapshot for a `claude_code` account from the local session logs
//! instead of an HTTP API. Scans are cached per account in an injected
//! `ProbeCache` so polls inside the TTL do not re-read every log file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use super::claude_logs::{default_projects_root, find_jsonl_files, parse_session_file};
use super::{ProbeCache, ProviderAdapter, ProviderError};
use crate::models::{Account, Metric, Snapshot, SnapshotStatus, TimePoint};

pub const PROVIDER_ID: &str = "claude_code";

/// Days covered by the `analytics_30d_*` metrics
const LOOKBACK_DAYS: i64 = 30;

const DECLARED_METRICS: &[&str] = &[
    "today_api_cost",
    "today_tokens",
    "analytics_30d_cost",
    "analytics_30d_tokens",
];

#[derive(Debug, Default)]
struct ModelTotals {
    input: u64,
    output: u64,
    cache_read: u64,
    cache_write: u64,
    cost: f64,
}

#[derive(Debug, Default)]
struct DayTotals {
    tokens: u64,
    cost: f64,
}

/// Provider backed by `~/.claude/projects/**.jsonl`
pub struct ClaudeLocalProvider {
    projects_root: PathBuf,
    cache: Arc<ProbeCache<Snapshot>>,
}

impl ClaudeLocalProvider {
    /// Create a provider reading the default projects root
    pub fn new() -> Self {
        Self::with_root(default_projects_root())
    }

    /// Create with a custom projects root
    pub fn with_root(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            cache: Arc::new(ProbeCache::default()),
        }
    }

    /// Share a probe cache with the caller (tests reset it explicitly)
    pub fn with_cache(mut self, cache: Arc<ProbeCache<Snapshot>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }
}

impl Default for ClaudeLocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate the last `LOOKBACK_DAYS` of session logs into a snapshot
fn scan_usage(root: &Path, provider_id: &str, account_id: &str, now: DateTime<Utc>) -> Snapshot {
    let today = now.date_naive();
    let start = today - Duration::days(LOOKBACK_DAYS - 1);

    let files = find_jsonl_files(root);
    log::debug!("[claude_local] Found {} JSONL files in {:?}", files.len(), root);

    let mut daily: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();
    let mut models: BTreeMap<String, ModelTotals> = BTreeMap::new();
    let mut sessions = HashSet::new();

    for file in &files {
        let lines = match parse_session_file(file) {
            Ok(lines) => lines,
            Err(e) => {
                log::warn!("[claude_local] Failed to read {:?}: {}", file, e);
                continue;
            }
        };
        for line in lines {
            let Some(date) = line.timestamp.map(|ts| ts.date_naive()) else {
                continue;
            };
            if date < start || date > today {
                continue;
            }
            let cost = line.cost_usd();

            let day = daily.entry(date).or_default();
            day.tokens += line.usage.total_tokens();
            day.cost += cost;

            let model = models.entry(line.model.to_lowercase()).or_default();
            model.input += line.usage.input_tokens;
            model.output += line.usage.output_tokens;
            model.cache_read += line.usage.cache_read_tokens;
            model.cache_write += line.usage.cache_creation_tokens;
            model.cost += cost;

            sessions.insert(line.session_id);
        }
    }

    let (today_cost, today_tokens) = daily
        .get(&today)
        .map(|d| (d.cost, d.tokens))
        .unwrap_or((0.0, 0));
    let total_cost: f64 = daily.values().map(|d| d.cost).sum();
    let total_tokens: u64 = daily.values().map(|d| d.tokens).sum();

    let mut snapshot = Snapshot::new(provider_id, account_id)
        .with_timestamp(now)
        .with_status(SnapshotStatus::Ok)
        .with_metric("today_api_cost", Metric::used(today_cost, "USD", "today"))
        .with_metric("today_tokens", Metric::used(today_tokens as f64, "tokens", "today"))
        .with_metric("analytics_30d_cost", Metric::used(total_cost, "USD", "30d"))
        .with_metric(
            "analytics_30d_tokens",
            Metric::used(total_tokens as f64, "tokens", "30d"),
        );

    for (model, totals) in &models {
        let window = format!("{}d", LOOKBACK_DAYS);
        let per_model = [
            ("input_tokens", totals.input as f64, "tokens"),
            ("output_tokens", totals.output as f64, "tokens"),
            ("cache_read_tokens", totals.cache_read as f64, "tokens"),
            ("cache_write_tokens", totals.cache_write as f64, "tokens"),
            ("cost_usd", totals.cost, "USD"),
        ];
        for (suffix, value, unit) in per_model {
            snapshot = snapshot.with_metric(
                format!("model_{}_{}", model, suffix),
                Metric::used(value, unit, window.as_str()),
            );
        }
    }

    let cost_series = daily
        .iter()
        .map(|(date, d)| TimePoint::new(date.format("%Y-%m-%d").to_string(), d.cost))
        .collect();
    let token_series = daily
        .iter()
        .map(|(date, d)| TimePoint::new(date.format("%Y-%m-%d").to_string(), d.tokens as f64))
        .collect();

    snapshot
        .with_series("cost", cost_series)
        .with_series("tokens_total", token_series)
        .with_raw("projects_root", root.display().to_string())
        .with_raw("sessions", sessions.len().to_string())
        .with_raw("files_scanned", files.len().to_string())
}

#[async_trait]
impl ProviderAdapter for ClaudeLocalProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn declared_metrics(&self) -> &[&'static str] {
        DECLARED_METRICS
    }

    async fn fetch(
        &self,
        ctx: &CancellationToken,
        account: &Account,
    ) -> Result<Snapshot, ProviderError> {
        if let Some(cached) = self.cache.get(&account.id).await {
            log::debug!("[claude_local] Using cached scan for {}", account.id);
            return Ok(cached);
        }

        let root = self.projects_root.clone();
        if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
            return Err(ProviderError::NotInstalled(format!(
                "Claude Code logs not found at {}",
                root.display()
            )));
        }

        if ctx.is_cancelled() {
            return Err(ProviderError::Other("fetch cancelled before log scan".to_string()));
        }

        let provider_id = account.provider_id.clone();
        let account_id = account.id.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            scan_usage(&root, &provider_id, &account_id, Utc::now())
        })
        .await
        .map_err(|e| ProviderError::Other(format!("log scan failed: {}", e)))?;

        self.cache.insert(account.id.clone(), snapshot.clone()).await;
        Ok(snapshot)
    }
}
