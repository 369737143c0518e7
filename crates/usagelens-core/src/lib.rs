//! # usagelens-core
//!
//! Core engine for UsageLens - shared by the CLI and any other front end.
//!
//! This crate provides:
//! - Concurrent usage polling over provider adapters (`services::engine`)
//! - Model identity canonicalization (`services::canonical`)
//! - Snapshot normalization (`services::normalize`)
//! - Local telemetry collection, spooling and storage (`services::telemetry`)
//! - Read-model overlay and stabilization (`services::overlay`, `services::stabilizer`)
//! - Configuration (`config`), database (`db`) and error handling (`error`)

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

// Re-exports for convenience
pub use config::{AccountConfig, AppConfig, TelemetryConfig};
pub use db::Database;
pub use error::{Error, Result};

pub use models::{
    Account, AuthMode, CanonicalModelIdentity, GroupBy, Metric, ModelNormalizationConfig,
    ModelOverride, ModelUsageRecord, Snapshot, SnapshotStatus, TimePoint,
};

pub use services::{
    apply_canonical_telemetry_view, apply_telemetry_view, is_degraded, normalize_canonical_model,
    normalize_series_points, normalize_snapshot, stabilize, AutoCollectReport, AutoCollector,
    ClaudeCodeCollector, ClaudeLocalProvider, CollectOptions, Collector, EngineConfig,
    FlushResult, IngestSummary, Pipeline, PollEngine, ProbeCache, ProviderAdapter, ProviderError,
    QuotaSnapshotIngestor, ReadModelStabilizer, Spool, TelemetryEvent, TelemetryStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = version().split('.').collect();
        assert_eq!(parts.len(), 3, "Version should be in x.y.z format");
    }
}
