//! Collect command
//!
//! One telemetry collect + flush pass, for cron jobs and debugging.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;
use usagelens_core::{AutoCollectReport, TelemetryStore};

use super::{build_auto_collector, Context};
use crate::output::{print_output, print_success, print_warning};

#[derive(Args)]
pub struct CollectArgs {
    /// Print store totals after the pass
    #[arg(long)]
    pub stats: bool,
}

#[derive(Debug, Serialize, Tabled)]
pub struct CollectRow {
    #[tabled(rename = "Collected")]
    pub collected: usize,
    #[tabled(rename = "Skipped")]
    pub skipped: usize,
    #[tabled(rename = "Processed")]
    pub processed: usize,
    #[tabled(rename = "Ingested")]
    pub ingested: usize,
    #[tabled(rename = "Deduped")]
    pub deduped: usize,
    #[tabled(rename = "Failed")]
    pub failed: usize,
    #[tabled(rename = "Warnings")]
    pub warnings: usize,
}

impl From<&AutoCollectReport> for CollectRow {
    fn from(report: &AutoCollectReport) -> Self {
        Self {
            collected: report.collected,
            skipped: report.skipped,
            processed: report.flush.processed,
            ingested: report.flush.ingested,
            deduped: report.flush.deduped,
            failed: report.flush.failed,
            warnings: report.warnings.len(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct StoreStatsRow {
    #[tabled(rename = "Events")]
    pub events: i64,
    #[tabled(rename = "Snapshots")]
    pub snapshots: i64,
    #[tabled(rename = "Spool Pending")]
    pub pending: usize,
}

pub async fn execute(ctx: &Context, args: CollectArgs) -> Result<()> {
    let db_path = ctx.config.resolve_db_path()?;
    let store = TelemetryStore::open(&db_path).await?;
    let result = collect(ctx, &args, &store).await;
    store.close().await;
    result
}

async fn collect(ctx: &Context, args: &CollectArgs, store: &TelemetryStore) -> Result<()> {
    let collector = build_auto_collector(&ctx.config, store.clone())?;

    let token = CancellationToken::new();
    let report = collector.run_once(&token).await;

    print_output(&[CollectRow::from(&report)], ctx.format)?;
    for warning in &report.warnings {
        print_warning(warning);
    }

    if args.stats {
        let stats = StoreStatsRow {
            events: store.event_count().await?,
            snapshots: store.snapshot_count().await?,
            pending: collector.pipeline().spool().pending()?,
        };
        print_output(&[stats], ctx.format)?;
    }

    if report.warnings.is_empty() {
        print_success(
            &format!(
                "Collected {} events ({} new)",
                report.collected, report.flush.ingested
            ),
            ctx.quiet,
        );
    }
    Ok(())
}
