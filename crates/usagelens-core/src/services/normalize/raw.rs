//! Raw-bag classification

use crate::models::Snapshot;

/// Keys that carry problems rather than descriptive attributes
pub fn is_diagnostic_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.contains("error") || key.contains("warning") || key.ends_with("_err") || key.ends_with("_warn")
}

/// Route every non-empty `raw` entry into `diagnostics` or `attributes`.
///
/// Existing values win; `raw` itself is left untouched.
pub fn classify_raw(snapshot: &mut Snapshot) {
    let Snapshot {
        raw,
        attributes,
        diagnostics,
        ..
    } = snapshot;

    for (key, value) in raw.iter() {
        if key.trim().is_empty() || value.trim().is_empty() {
            continue;
        }
        let target = if is_diagnostic_key(key) {
            &mut *diagnostics
        } else {
            &mut *attributes
        };
        target.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

/// First whitespace-delimited numeric token of a raw string value.
///
/// Thousands separators, a leading `$` and a trailing `%` are ignored.
pub fn parse_numeric(value: &str) -> Option<f64> {
    value.split_whitespace().find_map(|token| {
        let cleaned = token.replace(',', "");
        let cleaned = cleaned.trim_start_matches('$').trim_end_matches('%');
        cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_keys() {
        assert!(is_diagnostic_key("quota_fetch_error"));
        assert!(is_diagnostic_key("Rate_Warning"));
        assert!(is_diagnostic_key("billing_err"));
        assert!(is_diagnostic_key("cookie_warn"));
        assert!(!is_diagnostic_key("plan_name"));
        assert!(!is_diagnostic_key("warned_at"));
    }

    #[test]
    fn test_classify_routes_and_never_overwrites() {
        let mut snap = Snapshot::new("cursor", "acct")
            .with_raw("plan", "pro")
            .with_raw("usage_error", "HTTP 500")
            .with_raw("team", "")
            .with_raw("email", "raw@example.com");
        snap.attributes
            .insert("email".to_string(), "adapter@example.com".to_string());

        classify_raw(&mut snap);

        assert_eq!(snap.attributes.get("plan").map(String::as_str), Some("pro"));
        assert_eq!(
            snap.diagnostics.get("usage_error").map(String::as_str),
            Some("HTTP 500")
        );
        assert_eq!(
            snap.attributes.get("email").map(String::as_str),
            Some("adapter@example.com")
        );
        assert!(!snap.attributes.contains_key("team"));
        assert!(!snap.attributes.contains_key("usage_error"));
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("1,250 tokens"), Some(1250.0));
        assert_eq!(parse_numeric("approx $3.50 today"), Some(3.5));
        assert_eq!(parse_numeric("n/a"), None);
        assert_eq!(parse_numeric(""), None);
    }
}
