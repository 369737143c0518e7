//! Snapshot Normalizer
//!
//! Post-processes an adapter snapshot before it enters the engine's map:
//!
//! 1. raw-bag classification into attributes/diagnostics
//! 2. model-usage synthesis from per-model metric keys
//! 3. canonicalization of every model-usage record
//! 4. daily-series aliasing, "today" synthesis and point normalization
//!
//! The whole pass is idempotent on its own output.

mod model_usage;
mod raw;
mod series;

pub use model_usage::{
    canonicalize_model_usage, parse_model_key, synthesize_model_usage, UsageField,
    DIM_ACCOUNT_ID, DIM_CANONICAL_GROUP_ID, DIM_PROVIDER_ID,
};
pub use raw::{classify_raw, is_diagnostic_key, parse_numeric};
pub use series::{is_multi_day_window, normalize_daily_series, normalize_series_points, series_model_key};

use crate::models::{ModelNormalizationConfig, Snapshot};

/// Normalize one snapshot
pub fn normalize_snapshot(mut snapshot: Snapshot, cfg: &ModelNormalizationConfig) -> Snapshot {
    classify_raw(&mut snapshot);

    if snapshot.model_usage.is_empty() {
        snapshot.model_usage = synthesize_model_usage(&snapshot);
    }

    let provider_id = snapshot.provider_id.clone();
    let account_id = snapshot.account_id.clone();
    canonicalize_model_usage(&mut snapshot.model_usage, &provider_id, &account_id, cfg);

    normalize_daily_series(&mut snapshot);

    log::debug!(
        "[normalize] {}/{}: {} model records, {} series",
        provider_id,
        account_id,
        snapshot.model_usage.len(),
        snapshot.daily_series.len()
    );

    snapshot
}
