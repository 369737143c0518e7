//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod canonical;
pub mod collect;
pub mod config;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use crate::output::OutputFormat;
use usagelens_core::{
    AppConfig, AutoCollector, ClaudeCodeCollector, Pipeline, Spool, TelemetryStore,
};

/// Shared context for all commands
pub struct Context {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub format: OutputFormat,
    pub quiet: bool,
}

/// Wire the spool, pipeline and built-in collectors over an open store
pub fn build_auto_collector(
    config: &AppConfig,
    store: TelemetryStore,
) -> anyhow::Result<AutoCollector> {
    let spool_dir = config.resolve_spool_dir()?;
    let spool = Spool::open(spool_dir.clone())?;
    log::debug!("[cli] Spool at {:?}", spool_dir);

    let pipeline = Arc::new(Pipeline::new(spool, store));
    Ok(AutoCollector::new(pipeline, config.collect_options())
        .with_collector(Arc::new(ClaudeCodeCollector::new()))
        .with_flush_limits(
            config.telemetry.flush_batch_size,
            config.telemetry.flush_max_total,
        ))
}
