//! Watch command
//!
//! Runs the poll engine and the telemetry auto-collector side by side and
//! redraws the stabilized, telemetry-overlaid read model on every refresh.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;
use usagelens_core::services::telemetry::collectors::claude_code::PROJECTS_OPTION;
use usagelens_core::{
    apply_telemetry_view, ClaudeLocalProvider, PollEngine, QuotaSnapshotIngestor,
    ReadModelStabilizer, Snapshot, TelemetryStore,
};

use super::{build_auto_collector, Context};
use crate::output::{
    format_compact, print_heading, print_info, print_json, print_output, print_warning,
    OutputFormat,
};

const MIN_REFRESH_SECS: u64 = 1;
const MESSAGE_WIDTH: usize = 60;

#[derive(Args)]
pub struct WatchArgs {
    /// Poll once, print and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between screen refreshes
    #[arg(long, default_value = "5")]
    pub refresh: u64,

    /// Also list every metric per account
    #[arg(long)]
    pub metrics: bool,

    /// Also list per-model usage per account
    #[arg(long)]
    pub models: bool,
}

#[derive(Debug, Serialize, Tabled)]
pub struct AccountRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Provider")]
    pub provider: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Metrics")]
    pub metrics: usize,
    #[tabled(rename = "Models")]
    pub models: usize,
    #[tabled(rename = "Events")]
    pub telemetry_events: String,
    #[tabled(rename = "Updated")]
    pub updated: String,
    #[tabled(rename = "Message")]
    pub message: String,
}

#[derive(Debug, Serialize, Tabled)]
pub struct MetricRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Used")]
    pub used: String,
    #[tabled(rename = "Limit")]
    pub limit: String,
    #[tabled(rename = "%")]
    pub percent: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
    #[tabled(rename = "Window")]
    pub window: String,
}

#[derive(Debug, Serialize, Tabled)]
pub struct ModelRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Model")]
    pub model: String,
    #[tabled(rename = "Canonical")]
    pub canonical: String,
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Tokens")]
    pub tokens: String,
    #[tabled(rename = "Cost")]
    pub cost: String,
}

pub async fn execute(ctx: &Context, args: WatchArgs) -> Result<()> {
    let accounts = ctx.config.accounts();
    if accounts.is_empty() {
        print_warning(&format!(
            "No accounts configured. Add [[accounts]] entries to {}",
            ctx.config_path.display()
        ));
        return Ok(());
    }

    let engine = PollEngine::new(ctx.config.engine_config());
    let provider = match ctx.config.collect_options().path(PROJECTS_OPTION) {
        Some(root) => ClaudeLocalProvider::with_root(root.clone()),
        None => ClaudeLocalProvider::new(),
    };
    engine.register_provider(Arc::new(provider)).await;
    engine.set_accounts(accounts).await;

    let db_path = ctx.config.resolve_db_path()?;
    let store = TelemetryStore::open(&db_path).await?;
    log::debug!("[cli] Telemetry store at {:?}", db_path);

    let result = if args.once {
        watch_once(ctx, &args, &engine, &store).await
    } else {
        watch_loop(ctx, &args, &engine, &store).await
    };

    engine.shutdown();
    store.close().await;
    result
}

async fn watch_once(
    ctx: &Context,
    args: &WatchArgs,
    engine: &PollEngine,
    store: &TelemetryStore,
) -> Result<()> {
    let token = CancellationToken::new();
    engine.refresh_all(&token).await?;

    let snapshots = engine.snapshots().await;
    let ingestor = QuotaSnapshotIngestor::new(store.clone());
    match ingestor.ingest(&token, &snapshots).await {
        Ok(summary) => log::debug!("[cli] Snapshot ingest: {:?}", summary),
        Err(e) => log::warn!("[cli] Snapshot ingest skipped: {}", e),
    }

    if ctx.config.telemetry.enabled {
        let collector = build_auto_collector(&ctx.config, store.clone())?;
        let report = collector.run_once(&token).await;
        for warning in &report.warnings {
            log::warn!("[cli] {}", warning);
        }
    }

    let view = apply_telemetry_view(
        &token,
        store,
        snapshots,
        &ctx.config.model_normalization,
    )
    .await;
    let mut stabilizer = ReadModelStabilizer::new();
    render(ctx, args, &stabilizer.apply(view))
}

async fn watch_loop(
    ctx: &Context,
    args: &WatchArgs,
    engine: &PollEngine,
    store: &TelemetryStore,
) -> Result<()> {
    let token = CancellationToken::new();

    let ingestor = QuotaSnapshotIngestor::new(store.clone());
    let ingest_token = token.clone();
    engine
        .on_update(move |snapshots: HashMap<String, Snapshot>| {
            let ingestor = ingestor.clone();
            let token = ingest_token.clone();
            tokio::spawn(async move {
                match ingestor.ingest(&token, &snapshots).await {
                    Ok(summary) if summary.failed > 0 => {
                        log::warn!("[cli] {} snapshots failed to persist", summary.failed)
                    }
                    Ok(summary) => log::debug!("[cli] Snapshot ingest: {:?}", summary),
                    Err(e) => log::debug!("[cli] Snapshot ingest skipped: {}", e),
                }
            });
        })
        .await;

    let mut tasks = Vec::new();

    let poller = engine.clone();
    let poll_token = token.clone();
    tasks.push(tokio::spawn(async move { poller.run(poll_token).await }));

    if ctx.config.telemetry.enabled {
        let collector = build_auto_collector(&ctx.config, store.clone())?;
        let interval = ctx.config.collect_interval();
        let collect_token = token.clone();
        tasks.push(tokio::spawn(async move {
            collector
                .run(collect_token, interval, |report| {
                    if report.collected > 0 || report.flush.processed > 0 {
                        log::debug!(
                            "[cli] Collected {} events, ingested {}",
                            report.collected,
                            report.flush.ingested
                        );
                    }
                })
                .await
        }));
    } else {
        print_info("Telemetry collection disabled", ctx.quiet);
    }

    let mut stabilizer = ReadModelStabilizer::new();
    let mut ticker =
        tokio::time::interval(Duration::from_secs(args.refresh.max(MIN_REFRESH_SECS)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                print_info("Stopping...", ctx.quiet);
                break;
            }
            _ = ticker.tick() => {
                let snapshots = engine.snapshots().await;
                if snapshots.is_empty() {
                    continue;
                }
                let view = apply_telemetry_view(
                    &token,
                    store,
                    snapshots,
                    &ctx.config.model_normalization,
                )
                .await;
                let stable = stabilizer.apply(view);
                if ctx.format == OutputFormat::Table {
                    print!("\x1B[2J\x1B[H");
                }
                render(ctx, args, &stable)?;
            }
        }
    }

    token.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            log::warn!("[cli] Background task ended abnormally: {}", e);
        }
    }
    Ok(())
}

fn render(ctx: &Context, args: &WatchArgs, snapshots: &HashMap<String, Snapshot>) -> Result<()> {
    let ordered: BTreeMap<&String, &Snapshot> = snapshots.iter().collect();

    if ctx.format == OutputFormat::Json {
        return print_json(&ordered);
    }

    print_heading(
        &format!(
            "UsageLens - {} accounts - {}",
            ordered.len(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
        ctx.quiet,
    );

    let rows: Vec<AccountRow> = ordered.values().map(|s| account_row(s)).collect();
    print_output(&rows, ctx.format)?;

    if args.metrics {
        let rows: Vec<MetricRow> = ordered.values().flat_map(|s| metric_rows(s)).collect();
        print_output(&rows, ctx.format)?;
    }

    if args.models {
        let rows: Vec<ModelRow> = ordered.values().flat_map(|s| model_rows(s)).collect();
        print_output(&rows, ctx.format)?;
    }

    Ok(())
}

fn account_row(snapshot: &Snapshot) -> AccountRow {
    AccountRow {
        account: snapshot.account_id.clone(),
        provider: snapshot.provider_id.clone(),
        status: snapshot.status.to_string(),
        metrics: snapshot.metrics.len(),
        models: snapshot.model_usage.len(),
        telemetry_events: snapshot
            .attributes
            .get(usagelens_core::services::overlay::ATTR_TELEMETRY_EVENTS)
            .cloned()
            .unwrap_or_else(|| "-".to_string()),
        updated: snapshot
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S")
            .to_string(),
        message: truncate(&snapshot.message, MESSAGE_WIDTH),
    }
}

fn metric_rows(snapshot: &Snapshot) -> Vec<MetricRow> {
    let mut keys: Vec<&String> = snapshot.metrics.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| {
            let metric = &snapshot.metrics[key];
            MetricRow {
                account: snapshot.account_id.clone(),
                metric: key.clone(),
                used: optional(metric.used),
                limit: optional(metric.limit),
                percent: metric
                    .percent_used()
                    .map(|p| format!("{:.0}%", p))
                    .unwrap_or_else(|| "-".to_string()),
                unit: metric.unit.clone(),
                window: metric.window.clone(),
            }
        })
        .collect()
}

fn model_rows(snapshot: &Snapshot) -> Vec<ModelRow> {
    snapshot
        .model_usage
        .iter()
        .map(|record| ModelRow {
            account: snapshot.account_id.clone(),
            model: record.raw_model_id.clone(),
            canonical: if record.canonical_release_id.is_empty() {
                record.canonical_lineage_id.clone()
            } else {
                record.canonical_release_id.clone()
            },
            source: record.raw_source.clone(),
            tokens: optional(record.total_tokens),
            cost: record
                .cost_usd
                .map(|c| format!("${:.2}", c))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect()
}

fn optional(value: Option<f64>) -> String {
    value.map(format_compact).unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let head: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", head)
}
