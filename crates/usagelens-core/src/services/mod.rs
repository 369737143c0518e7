//! Services module
//!
//! - `engine`: concurrent poll loop over provider adapters
//! - `canonical`: model identity canonicalization
//! - `normalize`: snapshot post-processing
//! - `providers`: adapter trait and built-in adapters
//! - `telemetry`: local usage collection, spool and store
//! - `overlay` / `stabilizer`: read-model enrichment

pub mod canonical;
pub mod engine;
pub mod normalize;
pub mod overlay;
pub mod providers;
pub mod stabilizer;
pub mod telemetry;

pub use canonical::normalize_canonical_model;
pub use engine::{EngineConfig, PollEngine, UpdateCallback};
pub use normalize::{normalize_series_points, normalize_snapshot};
pub use overlay::{apply_canonical_telemetry_view, apply_telemetry_view};
pub use providers::{ClaudeLocalProvider, ProbeCache, ProviderAdapter, ProviderError};
pub use stabilizer::{is_degraded, stabilize, ReadModelStabilizer};
pub use telemetry::{
    AutoCollectReport, AutoCollector, ClaudeCodeCollector, CollectOptions, Collector,
    FlushResult, IngestSummary, Pipeline, QuotaSnapshotIngestor, Spool, TelemetryEvent,
    TelemetryStore,
};
