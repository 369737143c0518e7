//! Read-model overlay
//!
//! Enriches live snapshots with statistics derived from the telemetry store.
//! The overlay only fills gaps: provider-reported model records, series and
//! metrics are never replaced. Any failure, timeout or cancellation returns
//! the input unchanged.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Metric, ModelNormalizationConfig, ModelUsageRecord, Snapshot, TimePoint};
use crate::services::normalize::{
    canonicalize_model_usage, normalize_series_points, series_model_key,
};
use crate::services::telemetry::TelemetryStore;

/// Budget for one overlay pass
pub const OVERLAY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Look-back for store-derived statistics
pub const LOOKBACK_DAYS: i64 = 30;

/// Window label of overlaid records and metrics
pub const OVERLAY_WINDOW: &str = "30d";

/// Attribute carrying the number of matched telemetry events
pub const ATTR_TELEMETRY_EVENTS: &str = "telemetry_events";

const SOURCE_TELEMETRY: &str = "telemetry";

/// Open the store at `db_path`, overlay, and close it again
pub async fn apply_canonical_telemetry_view(
    ctx: &CancellationToken,
    db_path: &Path,
    snapshots: HashMap<String, Snapshot>,
    cfg: &ModelNormalizationConfig,
) -> HashMap<String, Snapshot> {
    let work = async {
        let store = TelemetryStore::open(db_path).await?;
        let result = overlay_all(&store, &snapshots, cfg, Utc::now()).await;
        store.close().await;
        result
    };
    let merged = bounded(ctx, OVERLAY_TIMEOUT, work).await;
    merged.unwrap_or(snapshots)
}

/// Overlay using an already-open store
pub async fn apply_telemetry_view(
    ctx: &CancellationToken,
    store: &TelemetryStore,
    snapshots: HashMap<String, Snapshot>,
    cfg: &ModelNormalizationConfig,
) -> HashMap<String, Snapshot> {
    let work = overlay_all(store, &snapshots, cfg, Utc::now());
    let merged = bounded(ctx, OVERLAY_TIMEOUT, work).await;
    merged.unwrap_or(snapshots)
}

/// Run `work` within `budget`; `None` on error, timeout or cancellation
async fn bounded<F>(
    ctx: &CancellationToken,
    budget: Duration,
    work: F,
) -> Option<HashMap<String, Snapshot>>
where
    F: Future<Output = Result<HashMap<String, Snapshot>>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => {
            log::debug!("[overlay] Cancelled; keeping snapshots unchanged");
            None
        }
        result = tokio::time::timeout(budget, work) => match result {
            Ok(Ok(merged)) => Some(merged),
            Ok(Err(e)) => {
                log::warn!("[overlay] Telemetry view failed: {}", e);
                None
            }
            Err(_) => {
                log::warn!("[overlay] Telemetry view exceeded {:?}", budget);
                None
            }
        },
    }
}

async fn overlay_all(
    store: &TelemetryStore,
    snapshots: &HashMap<String, Snapshot>,
    cfg: &ModelNormalizationConfig,
    now: DateTime<Utc>,
) -> Result<HashMap<String, Snapshot>> {
    let since = now - chrono::Duration::days(LOOKBACK_DAYS);
    let mut merged = HashMap::with_capacity(snapshots.len());
    for (id, snapshot) in snapshots {
        let overlaid = overlay_snapshot(store, snapshot.clone(), &since, cfg).await?;
        merged.insert(id.clone(), overlaid);
    }
    Ok(merged)
}

async fn overlay_snapshot(
    store: &TelemetryStore,
    mut snapshot: Snapshot,
    since: &DateTime<Utc>,
    cfg: &ModelNormalizationConfig,
) -> Result<Snapshot> {
    let account_id = snapshot.account_id.clone();
    let provider_id = snapshot.provider_id.clone();

    let matched = store
        .matching_event_count(&account_id, &provider_id, since)
        .await?;
    if matched == 0 {
        return Ok(snapshot);
    }

    // Per-model records for models the provider did not report
    let known: HashSet<String> = snapshot
        .model_usage
        .iter()
        .map(|r| r.raw_model_id.trim().to_lowercase())
        .collect();
    let mut added: Vec<ModelUsageRecord> = store
        .model_totals(&account_id, &provider_id, since)
        .await?
        .into_iter()
        .filter(|row| !known.contains(&row.model_raw.trim().to_lowercase()))
        .map(|row| {
            let mut record = ModelUsageRecord::new(row.model_raw, SOURCE_TELEMETRY);
            record.window = OVERLAY_WINDOW.to_string();
            record.input_tokens = row.input_tokens;
            record.output_tokens = row.output_tokens;
            record.cached_tokens = row.cached_tokens;
            record.reasoning_tokens = row.reasoning_tokens;
            record.total_tokens = row.total_tokens;
            record.cost_usd = row.cost_usd;
            record.requests = row.requests;
            record
        })
        .filter(ModelUsageRecord::has_values)
        .collect();
    canonicalize_model_usage(&mut added, &provider_id, &account_id, cfg);
    snapshot.model_usage.extend(added);

    // Daily totals
    let daily = store.daily_totals(&account_id, &provider_id, since).await?;
    let mut totals: BTreeMap<&str, Vec<TimePoint>> = BTreeMap::new();
    for row in &daily {
        for (key, value) in [
            ("tokens_total", row.total_tokens),
            ("cost", row.cost_usd),
            ("requests", row.requests),
        ] {
            if let Some(value) = value {
                totals
                    .entry(key)
                    .or_default()
                    .push(TimePoint::new(&row.day, value));
            }
        }
    }
    for (key, points) in totals {
        insert_series_if_missing(&mut snapshot, key.to_string(), &points);
    }

    // Per-model daily tokens
    let mut per_model: BTreeMap<String, Vec<TimePoint>> = BTreeMap::new();
    for row in store
        .daily_model_totals(&account_id, &provider_id, since)
        .await?
    {
        let model_key = series_model_key(&row.model_raw);
        let Some(value) = row.total_tokens else {
            continue;
        };
        if model_key.is_empty() {
            continue;
        }
        per_model
            .entry(format!("tokens_{}", model_key))
            .or_default()
            .push(TimePoint::new(row.day, value));
    }
    for (key, points) in per_model {
        insert_series_if_missing(&mut snapshot, key, &points);
    }

    // Per-client totals
    for row in store.client_totals(&account_id, &provider_id, since).await? {
        let client_key = series_model_key(&row.client);
        let Some(total) = row.total_tokens.filter(|_| !client_key.is_empty()) else {
            continue;
        };
        snapshot
            .metrics
            .entry(format!("client_{}_total_tokens", client_key))
            .or_insert_with(|| Metric::used(total, "tokens", OVERLAY_WINDOW));
    }

    snapshot
        .attributes
        .insert(ATTR_TELEMETRY_EVENTS.to_string(), matched.to_string());

    log::debug!(
        "[overlay] {}: merged {} telemetry events",
        account_id,
        matched
    );
    Ok(snapshot)
}

fn insert_series_if_missing(snapshot: &mut Snapshot, key: String, points: &[TimePoint]) {
    let present = snapshot
        .daily_series
        .get(&key)
        .is_some_and(|existing| !existing.is_empty());
    if present {
        return;
    }
    let normalized = normalize_series_points(points);
    if !normalized.is_empty() {
        snapshot.daily_series.insert(key, normalized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SnapshotStatus;
    use crate::services::telemetry::TelemetryEvent;
    use tempfile::TempDir;

    async fn seeded_store(dir: &TempDir) -> TelemetryStore {
        let store = TelemetryStore::open(dir.path().join("store.db")).await.unwrap();
        let now = Utc::now();
        let events = [
            TelemetryEvent::new("claude_code", "claude_code", "s1", 0, now)
                .with_model("claude-opus-4-6")
                .with_tokens(1000.0, 250.0)
                .with_cost(0.5)
                .with_client("webapp"),
            TelemetryEvent::new("claude_code", "claude_code", "s1", 1, now)
                .with_model("claude-sonnet-4-5")
                .with_tokens(100.0, 50.0)
                .with_cost(0.1),
            TelemetryEvent::new("claude_code", "claude_code", "s1", 2, now - chrono::Duration::days(60))
                .with_model("claude-haiku-4-5")
                .with_tokens(9.0, 9.0),
        ];
        for event in &events {
            store.ingest_event(event).await.unwrap();
        }
        store
    }

    fn live() -> HashMap<String, Snapshot> {
        let mut map = HashMap::new();
        map.insert(
            "claude-main".to_string(),
            Snapshot::new("claude_code", "claude-main").with_status(SnapshotStatus::Ok),
        );
        map.insert(
            "cursor-main".to_string(),
            Snapshot::new("cursor", "cursor-main").with_status(SnapshotStatus::Ok),
        );
        map
    }

    #[tokio::test]
    async fn test_overlay_fills_models_series_and_clients() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let cfg = ModelNormalizationConfig::default();

        let input = live();
        let out = apply_telemetry_view(&CancellationToken::new(), &store, input.clone(), &cfg).await;

        let claude = &out["claude-main"];
        assert_eq!(claude.model_usage.len(), 2);
        let opus = claude
            .model_usage
            .iter()
            .find(|r| r.raw_model_id == "claude-opus-4-6")
            .unwrap();
        assert_eq!(opus.raw_source, "telemetry");
        assert_eq!(opus.canonical_lineage_id, "anthropic/claude-opus-4.6");
        assert_eq!(opus.total_tokens, Some(1250.0));
        assert_eq!(opus.window, "30d");

        assert_eq!(claude.daily_series["tokens_total"].len(), 1);
        assert_eq!(claude.daily_series["tokens_total"][0].value, 1400.0);
        assert!(claude.daily_series.contains_key("tokens_claude_opus_4_6"));
        assert_eq!(
            claude.metrics["client_webapp_total_tokens"].used,
            Some(1250.0)
        );
        assert_eq!(
            claude.attributes.get(ATTR_TELEMETRY_EVENTS).map(String::as_str),
            Some("2")
        );

        // No matching telemetry
        assert_eq!(out["cursor-main"], input["cursor-main"]);
    }

    #[tokio::test]
    async fn test_overlay_never_replaces_provider_data() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let cfg = ModelNormalizationConfig::default();

        let mut input = live();
        let claude = input.get_mut("claude-main").unwrap();
        let mut own = ModelUsageRecord::new("claude-opus-4-6", "adapter");
        own.total_tokens = Some(7.0);
        claude.model_usage.push(own);
        claude
            .daily_series
            .insert("cost".to_string(), vec![TimePoint::new("2026-01-01", 3.0)]);

        let out = apply_telemetry_view(&CancellationToken::new(), &store, input, &cfg).await;
        let claude = &out["claude-main"];

        let opus: Vec<_> = claude
            .model_usage
            .iter()
            .filter(|r| r.raw_model_id == "claude-opus-4-6")
            .collect();
        assert_eq!(opus.len(), 1);
        assert_eq!(opus[0].total_tokens, Some(7.0));
        assert_eq!(claude.daily_series["cost"], vec![TimePoint::new("2026-01-01", 3.0)]);
    }

    #[tokio::test]
    async fn test_failure_returns_input_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        store.close().await;

        let input = live();
        let out = apply_telemetry_view(
            &CancellationToken::new(),
            &store,
            input.clone(),
            &ModelNormalizationConfig::default(),
        )
        .await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_cancelled_returns_input_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let token = CancellationToken::new();
        token.cancel();

        let input = live();
        let out = apply_telemetry_view(
            &token,
            &store,
            input.clone(),
            &ModelNormalizationConfig::default(),
        )
        .await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_timeout_returns_input_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let cfg = ModelNormalizationConfig::default();
        let input = live();

        let slow = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            overlay_all(&store, &input, &cfg, Utc::now()).await
        };
        let merged = bounded(&CancellationToken::new(), Duration::from_millis(20), slow).await;
        assert!(merged.is_none());

        let out = merged.unwrap_or_else(|| input.clone());
        assert_eq!(out, input);
        assert!(out["claude-main"].model_usage.is_empty());
    }

    #[tokio::test]
    async fn test_apply_by_path_opens_and_closes() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        store.close().await;

        let out = apply_canonical_telemetry_view(
            &CancellationToken::new(),
            &dir.path().join("store.db"),
            live(),
            &ModelNormalizationConfig::default(),
        )
        .await;
        assert_eq!(out["claude-main"].model_usage.len(), 2);
    }
}
