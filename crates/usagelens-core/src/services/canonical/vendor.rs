//! Vendor lookup tables
//!
//! Each table is ordered; the first matching entry wins.

/// Vendor tokens accepted as an explicit `vendor/` prefix, with aliases
const VENDOR_PREFIXES: &[(&str, &str)] = &[
    ("anthropic", "anthropic"),
    ("openai", "openai"),
    ("google", "google"),
    ("xai", "xai"),
    ("x-ai", "xai"),
    ("mistral", "mistral"),
    ("mistralai", "mistral"),
    ("deepseek", "deepseek"),
    ("meta", "meta"),
    ("meta-llama", "meta"),
    ("cohere", "cohere"),
    ("qwen", "qwen"),
    ("moonshotai", "moonshotai"),
];

/// Token-to-vendor inference chain
const TOKEN_VENDORS: &[(&[&str], &str)] = &[
    (&["claude"], "anthropic"),
    (&["gpt", "codex"], "openai"),
    (&["gemini"], "google"),
    (&["grok"], "xai"),
    (&["mistral", "mixtral", "codestral"], "mistral"),
    (&["deepseek"], "deepseek"),
    (&["llama"], "meta"),
];

/// Provider IDs whose models belong to a single vendor
const PROVIDER_VENDORS: &[(&str, &str)] = &[
    ("claude_code", "anthropic"),
    ("anthropic", "anthropic"),
    ("claude", "anthropic"),
    ("openai", "openai"),
    ("codex", "openai"),
    ("codex_cli", "openai"),
    ("gemini_cli", "google"),
    ("gemini_api", "google"),
    ("google", "google"),
    ("xai", "xai"),
    ("grok", "xai"),
    ("mistral", "mistral"),
    ("deepseek", "deepseek"),
];

/// Canonical vendor for an explicit prefix token
pub fn vendor_from_prefix(prefix: &str) -> Option<&'static str> {
    VENDOR_PREFIXES
        .iter()
        .find(|(token, _)| *token == prefix)
        .map(|(_, vendor)| *vendor)
}

/// Vendor inferred from model tokens
pub fn vendor_from_tokens(tokens: &[String]) -> Option<&'static str> {
    TOKEN_VENDORS
        .iter()
        .find(|(markers, _)| tokens.iter().any(|t| markers.contains(&t.as_str())))
        .map(|(_, vendor)| *vendor)
}

/// Default vendor implied by a provider ID.
///
/// Matches the ID exactly or as a `<key>_` prefix (e.g. `claude_code_team`).
pub fn vendor_for_provider(provider_id: &str) -> Option<&'static str> {
    let provider = provider_id.trim().to_lowercase();
    if provider.is_empty() {
        return None;
    }
    PROVIDER_VENDORS
        .iter()
        .find(|(key, _)| {
            provider == *key
                || provider
                    .strip_prefix(key)
                    .is_some_and(|rest| rest.starts_with('_'))
        })
        .map(|(_, vendor)| *vendor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prefix_aliases() {
        assert_eq!(vendor_from_prefix("x-ai"), Some("xai"));
        assert_eq!(vendor_from_prefix("meta-llama"), Some("meta"));
        assert_eq!(vendor_from_prefix("openrouter"), None);
    }

    #[test]
    fn test_token_chain_order() {
        assert_eq!(vendor_from_tokens(&tokens(&["codestral", "latest"])), Some("mistral"));
        assert_eq!(vendor_from_tokens(&tokens(&["llama", "3.1"])), Some("meta"));
        assert_eq!(vendor_from_tokens(&tokens(&["o3", "mini"])), None);
    }

    #[test]
    fn test_provider_vendor_prefix_match() {
        assert_eq!(vendor_for_provider("claude_code"), Some("anthropic"));
        assert_eq!(vendor_for_provider("claude_code_team"), Some("anthropic"));
        assert_eq!(vendor_for_provider("codex_cli"), Some("openai"));
        assert_eq!(vendor_for_provider("cursor"), None);
        assert_eq!(vendor_for_provider("openaix"), None);
    }
}
