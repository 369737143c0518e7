//! Data models
//!
//! Canonical types shared by the poll engine, the normalizer and the
//! telemetry pipeline.

mod account;
mod snapshot;
mod usage;

pub use account::{Account, AuthMode};
pub use snapshot::{Metric, Snapshot, SnapshotStatus, TimePoint};
pub use usage::{
    CanonicalModelIdentity, GroupBy, ModelNormalizationConfig, ModelOverride, ModelUsageRecord,
    DEFAULT_MIN_CONFIDENCE,
};
