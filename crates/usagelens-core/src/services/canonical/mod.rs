//! Model identity canonicalization
//!
//! Resolves vendor-specific model strings (`claude-4.6-opus-high-thinking`,
//! `models/gemini-2.5-pro`, `model_claude_opus_4_6`) into a stable
//! lineage/release identity with a confidence score.
//!
//! # Precedence
//!
//! ```text
//! override  >  explicit vendor prefix  >  family heuristic  >  provider fallback
//! ```
//!
//! Overrides are checked first. Every other rule is a resolver in
//! [`IDENTITY_RESOLVERS`] or [`VENDOR_RESOLVERS`]; adding a vendor or family
//! means adding an entry there (and a row in `vendor.rs`/`stages.rs`).
//!
//! The whole module is pure: no I/O, no shared state.

pub mod stages;
pub mod vendor;

use crate::models::{CanonicalModelIdentity, ModelNormalizationConfig};

use stages::{
    detect_family, extract_release_date, extract_variant, extract_version, split_vendor_prefix,
    tokenize, Family, FamilyRule,
};
use vendor::{vendor_for_provider, vendor_from_tokens};

// ============================================================================
// Confidence levels
// ============================================================================

pub const CONFIDENCE_OVERRIDE: f64 = 1.0;
pub const CONFIDENCE_VARIANT_VERSION: f64 = 0.95;
pub const CONFIDENCE_VARIANT_JOINED_VERSION: f64 = 0.93;
pub const CONFIDENCE_EXPLICIT_VENDOR: f64 = 0.90;
pub const CONFIDENCE_VARIANT_ONLY: f64 = 0.82;
pub const CONFIDENCE_INFERRED_VENDOR: f64 = 0.80;
pub const CONFIDENCE_VERSION_ONLY: f64 = 0.78;
pub const CONFIDENCE_FAMILY_ONLY: f64 = 0.72;
pub const CONFIDENCE_PROVIDER_VENDOR: f64 = 0.72;
pub const CONFIDENCE_HEURISTIC: f64 = 0.60;
pub const CONFIDENCE_EMPTY: f64 = 0.10;

// ============================================================================
// Parsed input
// ============================================================================

/// Raw model string after prefix/date extraction and tokenization
#[derive(Debug, Clone)]
pub struct ParsedModel {
    pub explicit_vendor: Option<&'static str>,
    pub release_date: Option<String>,
    pub tokens: Vec<String>,
}

impl ParsedModel {
    pub fn parse(raw: &str) -> Self {
        let (without_prefix, explicit_vendor) = split_vendor_prefix(raw);
        let (without_date, release_date) = extract_release_date(&without_prefix);
        Self {
            explicit_vendor,
            release_date,
            tokens: tokenize(&without_date),
        }
    }

    /// Normalized model name used when no family rule applies
    fn plain_name(&self) -> String {
        if self.tokens.is_empty() {
            "unknown".to_string()
        } else {
            self.tokens.join("-")
        }
    }
}

type IdentityResolver = fn(&ParsedModel, &str) -> Option<CanonicalModelIdentity>;

/// Tried in order after overrides; the last resolver always answers
const IDENTITY_RESOLVERS: &[IdentityResolver] = &[family_identity, fallback_identity];

struct VendorGuess {
    vendor: &'static str,
    confidence: f64,
    reason: &'static str,
}

type VendorResolver = fn(&ParsedModel, &str) -> Option<VendorGuess>;

/// Fallback vendor chain for models outside the canonicalized families
const VENDOR_RESOLVERS: &[VendorResolver] = &[explicit_vendor, inferred_vendor, provider_vendor];

// ============================================================================
// Entry point
// ============================================================================

/// Resolve `raw_model_id` into a canonical identity.
///
/// Deterministic for identical inputs.
pub fn normalize_canonical_model(
    provider_id: &str,
    raw_model_id: &str,
    cfg: &ModelNormalizationConfig,
) -> CanonicalModelIdentity {
    if let Some(identity) = match_override(provider_id, raw_model_id, cfg) {
        return identity;
    }

    if raw_model_id.trim().is_empty() {
        let vendor = vendor_for_provider(provider_id).unwrap_or("unknown");
        return CanonicalModelIdentity {
            lineage_id: format!("{}/unknown", vendor),
            release_id: None,
            vendor: vendor.to_string(),
            family: Family::Unknown.as_str().to_string(),
            variant: String::new(),
            confidence: CONFIDENCE_EMPTY,
            reason: "empty_model".to_string(),
        };
    }

    let parsed = ParsedModel::parse(raw_model_id);
    IDENTITY_RESOLVERS
        .iter()
        .find_map(|resolve| resolve(&parsed, provider_id))
        .unwrap_or_else(|| heuristic_identity(&parsed))
}

fn match_override(
    provider_id: &str,
    raw_model_id: &str,
    cfg: &ModelNormalizationConfig,
) -> Option<CanonicalModelIdentity> {
    let raw = raw_model_id.trim();
    let entry = cfg.overrides.iter().find(|o| {
        o.raw_model_id.trim().eq_ignore_ascii_case(raw)
            && (o.provider.trim().is_empty() || o.provider.trim().eq_ignore_ascii_case(provider_id))
    })?;

    let lineage_id = entry.canonical_lineage.trim().to_string();
    let (vendor, name) = lineage_id
        .split_once('/')
        .unwrap_or(("unknown", lineage_id.as_str()));
    let family = detect_family(&tokenize(name))
        .map(|rule| rule.family)
        .unwrap_or(Family::Unknown);
    let release = entry.canonical_release.trim();

    Some(CanonicalModelIdentity {
        release_id: (!release.is_empty()).then(|| release.to_string()),
        vendor: vendor.to_string(),
        family: family.as_str().to_string(),
        variant: String::new(),
        confidence: CONFIDENCE_OVERRIDE,
        reason: "override".to_string(),
        lineage_id,
    })
}

// ============================================================================
// Family path
// ============================================================================

fn family_identity(parsed: &ParsedModel, _provider_id: &str) -> Option<CanonicalModelIdentity> {
    let rule = detect_family(&parsed.tokens)?;
    if rule.variants.is_empty() {
        return None;
    }

    let (variants, anchor) = extract_variant(&parsed.tokens, rule.variants);
    let version = extract_version(
        &parsed.tokens,
        anchor,
        rule.allow_o_suffix,
        rule.version_after_variant,
    );
    let variant = variants.join("-");

    let (confidence, reason) = match (&version, variants.is_empty()) {
        (Some(v), false) if v.joined => (CONFIDENCE_VARIANT_JOINED_VERSION, "family_variant_version"),
        (Some(_), false) => (CONFIDENCE_VARIANT_VERSION, "family_variant_version"),
        (None, false) => (CONFIDENCE_VARIANT_ONLY, "family_variant"),
        (Some(_), true) => (CONFIDENCE_VERSION_ONLY, "family_version"),
        (None, true) => (CONFIDENCE_FAMILY_ONLY, "family_only"),
    };

    let name = family_name(rule, &variant, version.as_ref().map(|v| v.text.as_str()));
    let vendor = parsed.explicit_vendor.unwrap_or(rule.vendor);
    Some(assemble(vendor, &name, parsed, rule.family, variant, confidence, reason))
}

fn family_name(rule: &FamilyRule, variant: &str, version: Option<&str>) -> String {
    let family = rule.family.as_str();
    let parts: Vec<&str> = match rule.family {
        // claude-<variant>-<version>
        Family::Claude => [Some(family), Some(variant), version]
            .into_iter()
            .flatten()
            .collect(),
        // <family>-<version>-<variant>
        _ => [Some(family), version, Some(variant)]
            .into_iter()
            .flatten()
            .collect(),
    };
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

// ============================================================================
// Fallback path
// ============================================================================

fn explicit_vendor(parsed: &ParsedModel, _provider_id: &str) -> Option<VendorGuess> {
    parsed.explicit_vendor.map(|vendor| VendorGuess {
        vendor,
        confidence: CONFIDENCE_EXPLICIT_VENDOR,
        reason: "explicit_vendor",
    })
}

fn inferred_vendor(parsed: &ParsedModel, _provider_id: &str) -> Option<VendorGuess> {
    vendor_from_tokens(&parsed.tokens).map(|vendor| VendorGuess {
        vendor,
        confidence: CONFIDENCE_INFERRED_VENDOR,
        reason: "inferred_vendor",
    })
}

fn provider_vendor(_parsed: &ParsedModel, provider_id: &str) -> Option<VendorGuess> {
    vendor_for_provider(provider_id).map(|vendor| VendorGuess {
        vendor,
        confidence: CONFIDENCE_PROVIDER_VENDOR,
        reason: "provider_vendor",
    })
}

fn fallback_identity(parsed: &ParsedModel, provider_id: &str) -> Option<CanonicalModelIdentity> {
    let guess = VENDOR_RESOLVERS
        .iter()
        .find_map(|resolve| resolve(parsed, provider_id))?;
    let family = detect_family(&parsed.tokens)
        .map(|rule| rule.family)
        .unwrap_or(Family::Unknown);
    Some(assemble(
        guess.vendor,
        &parsed.plain_name(),
        parsed,
        family,
        String::new(),
        guess.confidence,
        guess.reason,
    ))
}

fn heuristic_identity(parsed: &ParsedModel) -> CanonicalModelIdentity {
    assemble(
        "unknown",
        &parsed.plain_name(),
        parsed,
        Family::Unknown,
        String::new(),
        CONFIDENCE_HEURISTIC,
        "heuristic",
    )
}

fn assemble(
    vendor: &str,
    name: &str,
    parsed: &ParsedModel,
    family: Family,
    variant: String,
    confidence: f64,
    reason: &str,
) -> CanonicalModelIdentity {
    let lineage_id = format!("{}/{}", vendor, name);
    let release_id = parsed
        .release_date
        .as_ref()
        .map(|date| format!("{}@{}", lineage_id, date));
    CanonicalModelIdentity {
        lineage_id,
        release_id,
        vendor: vendor.to_string(),
        family: family.as_str().to_string(),
        variant,
        confidence,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelOverride;

    fn canon(provider: &str, raw: &str) -> CanonicalModelIdentity {
        normalize_canonical_model(provider, raw, &ModelNormalizationConfig::default())
    }

    #[test]
    fn test_cursor_claude_thinking_variant() {
        let id = canon("cursor", "claude-4.6-opus-high-thinking");
        assert_eq!(id.lineage_id, "anthropic/claude-opus-4.6");
        assert!(id.confidence >= 0.9);
        assert_eq!(id.vendor, "anthropic");
        assert_eq!(id.family, "claude");
        assert_eq!(id.variant, "opus");
        assert_eq!(id.release_id, None);
    }

    #[test]
    fn test_override_wins() {
        let cfg = ModelNormalizationConfig {
            overrides: vec![ModelOverride {
                provider: "cursor".to_string(),
                raw_model_id: "claude-4.6-opus-high-thinking".to_string(),
                canonical_lineage: "anthropic/claude-opus-4.6".to_string(),
                canonical_release: "anthropic/claude-opus-4.6@20260219".to_string(),
            }],
            ..Default::default()
        };
        let id = normalize_canonical_model("cursor", "Claude-4.6-Opus-High-Thinking", &cfg);
        assert_eq!(id.reason, "override");
        assert_eq!(id.confidence, 1.0);
        assert_eq!(id.lineage_id, "anthropic/claude-opus-4.6");
        assert_eq!(
            id.release_id.as_deref(),
            Some("anthropic/claude-opus-4.6@20260219")
        );
        assert_eq!(id.vendor, "anthropic");
    }

    #[test]
    fn test_override_scoped_to_other_provider_is_ignored() {
        let cfg = ModelNormalizationConfig {
            overrides: vec![ModelOverride {
                provider: "copilot".to_string(),
                raw_model_id: "claude-4.6-opus-high-thinking".to_string(),
                canonical_lineage: "custom/forced".to_string(),
                canonical_release: String::new(),
            }],
            ..Default::default()
        };
        let id = normalize_canonical_model("cursor", "claude-4.6-opus-high-thinking", &cfg);
        assert_ne!(id.reason, "override");
        assert_eq!(id.lineage_id, "anthropic/claude-opus-4.6");
    }

    #[test]
    fn test_dated_claude_release() {
        let id = canon("claude_code", "claude-sonnet-4-5-20250929");
        assert_eq!(id.lineage_id, "anthropic/claude-sonnet-4.5");
        assert_eq!(
            id.release_id.as_deref(),
            Some("anthropic/claude-sonnet-4.5@20250929")
        );
        assert_eq!(id.confidence, CONFIDENCE_VARIANT_JOINED_VERSION);
    }

    #[test]
    fn test_legacy_claude_ordering() {
        let id = canon("anthropic", "claude-3-5-haiku-20241022");
        assert_eq!(id.lineage_id, "anthropic/claude-haiku-3.5");
        assert_eq!(id.release_id.as_deref(), Some("anthropic/claude-haiku-3.5@20241022"));
    }

    #[test]
    fn test_metric_style_model_key() {
        let id = canon("claude_code", "claude_opus_4_6");
        assert_eq!(id.lineage_id, "anthropic/claude-opus-4.6");
        assert_eq!(id.reason, "family_variant_version");
    }

    #[test]
    fn test_gpt_shapes() {
        assert_eq!(canon("openai", "gpt-4o-mini").lineage_id, "openai/gpt-4o-mini");
        assert_eq!(canon("codex", "gpt-5-codex").lineage_id, "openai/gpt-5-codex");
        let dated = canon("openai", "gpt-4.1-nano-2025-04-14");
        assert_eq!(dated.lineage_id, "openai/gpt-4.1-nano");
        assert_eq!(dated.release_id.as_deref(), Some("openai/gpt-4.1-nano@20250414"));
        assert_eq!(canon("openai", "gpt-3.5-turbo-0125").lineage_id, "openai/gpt-3.5-turbo");
    }

    #[test]
    fn test_gemini_with_models_prefix() {
        let id = canon("gemini_cli", "models/gemini-2.5-flash-lite");
        assert_eq!(id.lineage_id, "google/gemini-2.5-flash-lite");
        assert_eq!(id.variant, "flash-lite");
    }

    #[test]
    fn test_confidence_by_evidence() {
        assert_eq!(canon("openai", "gpt-5").confidence, CONFIDENCE_VERSION_ONLY);
        assert_eq!(canon("openai", "gpt-5").reason, "family_version");
        assert_eq!(canon("x", "claude-opus").confidence, CONFIDENCE_VARIANT_ONLY);
        assert_eq!(canon("x", "claude-instant").confidence, CONFIDENCE_FAMILY_ONLY);
        assert_eq!(canon("x", "claude-instant").lineage_id, "anthropic/claude");
    }

    #[test]
    fn test_explicit_vendor_fallback() {
        let id = canon("openrouter", "mistralai/Mistral-Large-2411");
        assert_eq!(id.lineage_id, "mistral/mistral-large-2411");
        assert_eq!(id.reason, "explicit_vendor");
        assert_eq!(id.confidence, CONFIDENCE_EXPLICIT_VENDOR);
    }

    #[test]
    fn test_inferred_vendor_fallback() {
        let grok = canon("openrouter", "grok-4");
        assert_eq!(grok.lineage_id, "xai/grok-4");
        assert_eq!(grok.reason, "inferred_vendor");
        assert_eq!(grok.family, "grok");

        let llama = canon("ollama", "llama3.1:8b");
        assert_eq!(llama.vendor, "unknown");
        assert_eq!(llama.reason, "heuristic");
        assert_eq!(llama.lineage_id, "unknown/llama3.1-8b");
    }

    #[test]
    fn test_provider_vendor_fallback() {
        let id = canon("codex_cli", "o3-mini");
        assert_eq!(id.lineage_id, "openai/o3-mini");
        assert_eq!(id.reason, "provider_vendor");
        assert_eq!(id.confidence, CONFIDENCE_PROVIDER_VENDOR);
    }

    #[test]
    fn test_unknown_and_empty() {
        let unknown = canon("cursor", "auto");
        assert_eq!(unknown.lineage_id, "unknown/auto");
        assert_eq!(unknown.confidence, CONFIDENCE_HEURISTIC);

        let empty = canon("cursor", "   ");
        assert_eq!(empty.confidence, CONFIDENCE_EMPTY);
        assert_eq!(empty.lineage_id, "unknown/unknown");
    }

    #[test]
    fn test_deterministic() {
        let cfg = ModelNormalizationConfig::default();
        for raw in ["claude-4.6-opus-high-thinking", "gpt-4o", "deepseek-chat", ""] {
            let first = normalize_canonical_model("cursor", raw, &cfg);
            let second = normalize_canonical_model("cursor", raw, &cfg);
            assert_eq!(first, second);
        }
    }
}
