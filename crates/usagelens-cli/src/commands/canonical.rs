//! Canonical command
//!
//! Resolves a raw model string the same way the engine does, using the
//! configured overrides and grouping.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use usagelens_core::{
    normalize_canonical_model, CanonicalModelIdentity, ModelNormalizationConfig,
};

use super::Context;
use crate::output::print_output;

#[derive(Args)]
pub struct CanonicalArgs {
    /// Provider ID the model was reported by (e.g. cursor, openai)
    pub provider: String,

    /// Raw model strings to resolve
    #[arg(required = true)]
    pub raw: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
pub struct IdentityRow {
    #[tabled(rename = "Raw")]
    pub raw: String,
    #[tabled(rename = "Lineage")]
    pub lineage: String,
    #[tabled(rename = "Release")]
    pub release: String,
    #[tabled(rename = "Group")]
    pub group: String,
    #[tabled(rename = "Vendor")]
    pub vendor: String,
    #[tabled(rename = "Family")]
    pub family: String,
    #[tabled(rename = "Variant")]
    pub variant: String,
    #[tabled(rename = "Confidence")]
    pub confidence: String,
    #[tabled(rename = "Reason")]
    pub reason: String,
}

fn identity_row(
    raw: &str,
    identity: &CanonicalModelIdentity,
    cfg: &ModelNormalizationConfig,
) -> IdentityRow {
    IdentityRow {
        raw: raw.to_string(),
        lineage: identity.lineage_id.clone(),
        release: identity.release_id.clone().unwrap_or_else(|| "-".to_string()),
        group: identity.group_id(cfg.group_by).to_string(),
        vendor: identity.vendor.clone(),
        family: identity.family.clone(),
        variant: if identity.variant.is_empty() {
            "-".to_string()
        } else {
            identity.variant.clone()
        },
        confidence: format!("{:.2}", identity.confidence),
        reason: identity.reason.clone(),
    }
}

pub fn execute(ctx: &Context, args: CanonicalArgs) -> Result<()> {
    let cfg = &ctx.config.model_normalization;
    let rows: Vec<IdentityRow> = args
        .raw
        .iter()
        .map(|raw| {
            let identity = normalize_canonical_model(&args.provider, raw, cfg);
            if identity.confidence < cfg.min_confidence {
                log::debug!(
                    "[cli] {} resolves below min_confidence ({:.2})",
                    raw,
                    identity.confidence
                );
            }
            identity_row(raw, &identity, cfg)
        })
        .collect();

    print_output(&rows, ctx.format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_row_placeholders() {
        let identity = CanonicalModelIdentity {
            lineage_id: "openai/gpt-5".to_string(),
            release_id: None,
            vendor: "openai".to_string(),
            family: "gpt".to_string(),
            variant: String::new(),
            confidence: 0.9,
            reason: "heuristic".to_string(),
        };
        let row = identity_row("gpt-5", &identity, &ModelNormalizationConfig::default());
        assert_eq!(row.release, "-");
        assert_eq!(row.variant, "-");
        assert_eq!(row.group, "openai/gpt-5");
        assert_eq!(row.confidence, "0.90");
    }

    #[test]
    fn test_identity_row_groups_by_release() {
        let cfg = ModelNormalizationConfig {
            group_by: usagelens_core::GroupBy::Release,
            ..Default::default()
        };
        let identity = normalize_canonical_model("claude_code", "claude-sonnet-4-5-20250929", &cfg);
        let row = identity_row("claude-sonnet-4-5-20250929", &identity, &cfg);
        assert_eq!(row.lineage, "anthropic/claude-sonnet-4.5");
        assert_eq!(row.group, "anthropic/claude-sonnet-4.5@20250929");
    }
}
