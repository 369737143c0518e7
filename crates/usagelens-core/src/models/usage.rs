//! Model usage and canonical identity types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default minimum confidence for a record to join a canonical group
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.80;

// ============================================================================
// Model Usage
// ============================================================================

/// Per-model usage within one snapshot.
///
/// The `canonical_*` fields, `confidence` and `reason` are derived by the
/// canonicalizer and are never treated as authoritative input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsageRecord {
    pub raw_model_id: String,
    /// Where the record came from ("adapter", "metrics", "raw", "telemetry")
    #[serde(default)]
    pub raw_source: String,
    #[serde(default)]
    pub canonical_lineage_id: String,
    #[serde(default)]
    pub canonical_release_id: String,
    #[serde(default)]
    pub canonical_vendor: String,
    #[serde(default)]
    pub canonical_family: String,
    #[serde(default)]
    pub canonical_variant: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub window: String,
    #[serde(default)]
    pub dimensions: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<f64>,
}

impl ModelUsageRecord {
    pub fn new(raw_model_id: impl Into<String>, raw_source: impl Into<String>) -> Self {
        Self {
            raw_model_id: raw_model_id.into(),
            raw_source: raw_source.into(),
            ..Default::default()
        }
    }

    /// True when at least one numeric field is present
    pub fn has_values(&self) -> bool {
        [
            self.input_tokens,
            self.output_tokens,
            self.cached_tokens,
            self.reasoning_tokens,
            self.total_tokens,
            self.cost_usd,
            self.requests,
        ]
        .iter()
        .any(Option::is_some)
    }

    /// Fill `total_tokens` from input/output when the source omitted it
    pub fn fill_total_tokens(&mut self) {
        if self.total_tokens.is_some() {
            return;
        }
        self.total_tokens = match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (input, output) => Some(input.unwrap_or(0.0) + output.unwrap_or(0.0)),
        };
    }

    /// Apply a canonical identity to the derived fields
    pub fn apply_identity(&mut self, identity: &CanonicalModelIdentity) {
        self.canonical_lineage_id = identity.lineage_id.clone();
        self.canonical_release_id = identity.release_id.clone().unwrap_or_default();
        self.canonical_vendor = identity.vendor.clone();
        self.canonical_family = identity.family.clone();
        self.canonical_variant = identity.variant.clone();
        self.confidence = identity.confidence;
        self.reason = identity.reason.clone();
    }
}

// ============================================================================
// Canonical Identity
// ============================================================================

/// Stable lineage/release identity resolved from a raw model string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalModelIdentity {
    /// e.g. `anthropic/claude-opus-4.6`
    pub lineage_id: String,
    /// `lineage_id@YYYYMMDD` when a release date was recoverable
    pub release_id: Option<String>,
    pub vendor: String,
    pub family: String,
    pub variant: String,
    /// 0..=1
    pub confidence: f64,
    pub reason: String,
}

impl CanonicalModelIdentity {
    /// The ID used to group records under the given mode
    pub fn group_id(&self, group_by: GroupBy) -> &str {
        match group_by {
            GroupBy::Lineage => &self.lineage_id,
            GroupBy::Release => self.release_id.as_deref().unwrap_or(&self.lineage_id),
        }
    }
}

// ============================================================================
// Normalization Config
// ============================================================================

/// Grouping granularity for canonical model IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Lineage,
    Release,
}

/// A manual mapping that always wins over heuristics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOverride {
    /// Restrict the override to one provider; empty matches every provider
    #[serde(default)]
    pub provider: String,
    pub raw_model_id: String,
    pub canonical_lineage: String,
    #[serde(default)]
    pub canonical_release: String,
}

/// Process-wide model normalization settings, passed explicitly to every
/// normalization call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelNormalizationConfig {
    pub enabled: bool,
    pub group_by: GroupBy,
    pub min_confidence: f64,
    pub overrides: Vec<ModelOverride>,
}

impl Default for ModelNormalizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_by: GroupBy::Lineage,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            overrides: Vec::new(),
        }
    }
}

impl ModelNormalizationConfig {
    /// Clamp `min_confidence` into `[0, 1]` and drop overrides without a
    /// raw model ID or lineage
    pub fn validate(&self) -> Self {
        Self {
            enabled: self.enabled,
            group_by: self.group_by,
            min_confidence: if self.min_confidence.is_finite() {
                self.min_confidence.clamp(0.0, 1.0)
            } else {
                DEFAULT_MIN_CONFIDENCE
            },
            overrides: self
                .overrides
                .iter()
                .filter(|o| {
                    !o.raw_model_id.trim().is_empty() && !o.canonical_lineage.trim().is_empty()
                })
                .cloned()
                .collect(),
        }
    }
}
