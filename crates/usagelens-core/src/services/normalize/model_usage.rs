//! Model-usage synthesis and canonicalization

use std::collections::{BTreeMap, HashSet};

use crate::models::{ModelNormalizationConfig, ModelUsageRecord, Snapshot};
use crate::services::canonical::normalize_canonical_model;

use super::raw::parse_numeric;

pub const DIM_PROVIDER_ID: &str = "provider_id";
pub const DIM_ACCOUNT_ID: &str = "account_id";
pub const DIM_CANONICAL_GROUP_ID: &str = "canonical_group_id";

/// Numeric field of a `ModelUsageRecord` addressed by a metric key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageField {
    Input,
    Output,
    Cached,
    Reasoning,
    Cost,
    Requests,
}

/// `model_<id><suffix>` shapes; longer suffixes first
const MODEL_KEY_SUFFIXES: &[(&str, UsageField)] = &[
    ("_cache_read_tokens", UsageField::Cached),
    ("_cache_write_tokens", UsageField::Cached),
    ("_cached_tokens", UsageField::Cached),
    ("_reasoning_tokens", UsageField::Reasoning),
    ("_input_tokens", UsageField::Input),
    ("_output_tokens", UsageField::Output),
    ("_cost_usd", UsageField::Cost),
    ("_cost", UsageField::Cost),
    ("_requests", UsageField::Requests),
];

/// Legacy `<prefix><id>` shapes
const LEGACY_KEY_PREFIXES: &[(&str, UsageField)] = &[
    ("input_tokens_", UsageField::Input),
    ("output_tokens_", UsageField::Output),
];

/// Split a metric key into `(model_id, field)` if it is a per-model key
pub fn parse_model_key(key: &str) -> Option<(String, UsageField)> {
    let key = key.trim().to_lowercase();

    if let Some(rest) = key.strip_prefix("model_") {
        return MODEL_KEY_SUFFIXES.iter().find_map(|(suffix, field)| {
            rest.strip_suffix(suffix)
                .filter(|id| !id.is_empty())
                .map(|id| (id.to_string(), *field))
        });
    }

    LEGACY_KEY_PREFIXES.iter().find_map(|(prefix, field)| {
        key.strip_prefix(prefix)
            .filter(|id| !id.is_empty())
            .map(|id| (id.to_string(), *field))
    })
}

fn accumulate(record: &mut ModelUsageRecord, field: UsageField, value: f64) {
    // Cached sums read/write/cached keys; every other field keeps its first value.
    let slot = match field {
        UsageField::Cached => {
            record.cached_tokens = Some(record.cached_tokens.unwrap_or(0.0) + value);
            return;
        }
        UsageField::Input => &mut record.input_tokens,
        UsageField::Output => &mut record.output_tokens,
        UsageField::Reasoning => &mut record.reasoning_tokens,
        UsageField::Cost => &mut record.cost_usd,
        UsageField::Requests => &mut record.requests,
    };
    slot.get_or_insert(value);
}

/// Build model-usage records from per-model metric keys, falling back to
/// same-named `raw` values when no metric exists for a key.
///
/// Records are grouped by `(model_id, window)`; records without any numeric
/// field are dropped.
pub fn synthesize_model_usage(snapshot: &Snapshot) -> Vec<ModelUsageRecord> {
    let mut groups: BTreeMap<(String, String), ModelUsageRecord> = BTreeMap::new();

    let mut metric_keys: Vec<&String> = snapshot.metrics.keys().collect();
    metric_keys.sort();
    for key in metric_keys {
        let Some((model_id, field)) = parse_model_key(key) else {
            continue;
        };
        let metric = &snapshot.metrics[key];
        let Some(value) = metric.value() else {
            continue;
        };
        let record = groups
            .entry((model_id.clone(), metric.window.clone()))
            .or_insert_with(|| ModelUsageRecord {
                window: metric.window.clone(),
                ..ModelUsageRecord::new(model_id, "metrics")
            });
        accumulate(record, field, value);
    }

    // Keys are matched the way `parse_model_key` reads them
    let covered: HashSet<String> = snapshot
        .metrics
        .keys()
        .map(|key| key.trim().to_lowercase())
        .collect();

    let mut raw_keys: Vec<&String> = snapshot.raw.keys().collect();
    raw_keys.sort();
    for key in raw_keys {
        if covered.contains(&key.trim().to_lowercase()) {
            continue;
        }
        let Some((model_id, field)) = parse_model_key(key) else {
            continue;
        };
        let Some(value) = parse_numeric(&snapshot.raw[key]) else {
            continue;
        };
        let record = groups
            .entry((model_id.clone(), String::new()))
            .or_insert_with(|| ModelUsageRecord::new(model_id, "raw"));
        accumulate(record, field, value);
    }

    groups
        .into_values()
        .filter(ModelUsageRecord::has_values)
        .map(|mut record| {
            record.fill_total_tokens();
            record
        })
        .collect()
}

/// Canonicalize records in place and (re-)assert their dimensions.
///
/// `canonical_group_id` is only set when the identity clears
/// `cfg.min_confidence`.
pub fn canonicalize_model_usage(
    records: &mut [ModelUsageRecord],
    provider_id: &str,
    account_id: &str,
    cfg: &ModelNormalizationConfig,
) {
    for record in records.iter_mut() {
        if record.raw_source.is_empty() {
            record.raw_source = "adapter".to_string();
        }
        record.fill_total_tokens();
        record
            .dimensions
            .insert(DIM_PROVIDER_ID.to_string(), provider_id.to_string());
        record
            .dimensions
            .insert(DIM_ACCOUNT_ID.to_string(), account_id.to_string());

        if !cfg.enabled {
            continue;
        }

        let identity = normalize_canonical_model(provider_id, &record.raw_model_id, cfg);
        record.apply_identity(&identity);
        if identity.confidence >= cfg.min_confidence {
            record.dimensions.insert(
                DIM_CANONICAL_GROUP_ID.to_string(),
                identity.group_id(cfg.group_by).to_string(),
            );
        } else {
            record.dimensions.remove(DIM_CANONICAL_GROUP_ID);
        }
    }
}
