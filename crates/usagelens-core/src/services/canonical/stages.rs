//! Parsing stages for raw model strings
//!
//! Every stage is a small pure function so each rule can be tested on its own.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::vendor::vendor_from_prefix;

// ============================================================================
// Families
// ============================================================================

/// Model family detected from the token set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Claude,
    Gemini,
    Gpt,
    Grok,
    Unknown,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Claude => "claude",
            Family::Gemini => "gemini",
            Family::Gpt => "gpt",
            Family::Grok => "grok",
            Family::Unknown => "unknown",
        }
    }
}

/// Per-family canonicalization rules
pub struct FamilyRule {
    pub family: Family,
    /// Tokens that identify the family
    pub markers: &'static [&'static str],
    pub vendor: &'static str,
    /// Known variant tokens; empty means the family is not canonicalized
    pub variants: &'static [&'static str],
    /// Version tokens may carry an `o` suffix (`4o`)
    pub allow_o_suffix: bool,
    /// On equal distance, prefer the version token after the variant
    pub version_after_variant: bool,
}

/// Detection order: first rule with a marker in the token set wins
pub const FAMILY_RULES: &[FamilyRule] = &[
    FamilyRule {
        family: Family::Claude,
        markers: &["claude"],
        vendor: "anthropic",
        variants: &["opus", "sonnet", "haiku"],
        allow_o_suffix: false,
        version_after_variant: true,
    },
    FamilyRule {
        family: Family::Gemini,
        markers: &["gemini"],
        vendor: "google",
        variants: &["pro", "flash", "ultra", "nano", "lite"],
        allow_o_suffix: false,
        version_after_variant: false,
    },
    FamilyRule {
        family: Family::Gpt,
        markers: &["gpt", "codex"],
        vendor: "openai",
        variants: &["mini", "nano", "turbo", "codex", "pro"],
        allow_o_suffix: true,
        version_after_variant: false,
    },
    FamilyRule {
        family: Family::Grok,
        markers: &["grok"],
        vendor: "xai",
        variants: &[],
        allow_o_suffix: false,
        version_after_variant: false,
    },
];

// ============================================================================
// Prefix
// ============================================================================

/// Lower-case the raw string, drop a `models/` prefix and split off a known
/// `vendor/` prefix
pub fn split_vendor_prefix(raw: &str) -> (String, Option<&'static str>) {
    let lowered = raw.trim().to_lowercase();
    let stripped = lowered.strip_prefix("models/").unwrap_or(&lowered);

    if let Some((head, rest)) = stripped.split_once('/') {
        if let Some(vendor) = vendor_from_prefix(head) {
            return (rest.to_string(), Some(vendor));
        }
    }
    (stripped.to_string(), None)
}

// ============================================================================
// Release date
// ============================================================================

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})[-_](\d{2})[-_](\d{2})(?:[^0-9]|$)")
            .expect("iso date pattern is valid")
    })
}

fn compact_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})(\d{2})(\d{2})(?:[^0-9]|$)")
            .expect("compact date pattern is valid")
    })
}

/// Find a release date (`YYYY-MM-DD`, `YYYY_MM_DD` or `YYYYMMDD`).
///
/// Returns the input with the date removed and the date as `YYYYMMDD`.
/// Candidates that are not real calendar dates are ignored.
pub fn extract_release_date(input: &str) -> (String, Option<String>) {
    for re in [iso_date_re(), compact_date_re()] {
        for caps in re.captures_iter(input) {
            let (Some(year), Some(month), Some(day)) = (caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };
            let parsed = NaiveDate::from_ymd_opt(
                year.as_str().parse().unwrap_or(0),
                month.as_str().parse().unwrap_or(0),
                day.as_str().parse().unwrap_or(0),
            );
            if let Some(date) = parsed {
                let mut remaining = String::with_capacity(input.len());
                remaining.push_str(&input[..year.start()]);
                remaining.push_str(&input[day.end()..]);
                return (remaining, Some(date.format("%Y%m%d").to_string()));
            }
        }
    }
    (input.to_string(), None)
}

// ============================================================================
// Tokens
// ============================================================================

/// Lower-case, collapse runs of anything but `[a-z0-9.]` into `-`, and split
pub fn tokenize(input: &str) -> Vec<String> {
    let mut collapsed = String::with_capacity(input.len());
    let mut last_dash = false;
    for ch in input.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' {
            collapsed.push(ch);
            last_dash = false;
        } else if !last_dash {
            collapsed.push('-');
            last_dash = true;
        }
    }

    collapsed
        .trim_matches('-')
        .split('-')
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// First family rule with a marker token present
pub fn detect_family(tokens: &[String]) -> Option<&'static FamilyRule> {
    FAMILY_RULES
        .iter()
        .find(|rule| tokens.iter().any(|t| rule.markers.contains(&t.as_str())))
}

// ============================================================================
// Variant / version
// ============================================================================

/// Variant tokens in token order (deduplicated) and the index of the first
pub fn extract_variant(tokens: &[String], variants: &[&str]) -> (Vec<String>, Option<usize>) {
    let mut found: Vec<String> = Vec::new();
    let mut first = None;
    for (idx, token) in tokens.iter().enumerate() {
        if variants.contains(&token.as_str()) && !found.contains(token) {
            first.get_or_insert(idx);
            found.push(token.clone());
        }
    }
    (found, first)
}

/// A version token found near the variant
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub text: String,
    /// Built from two adjacent bare-digit tokens (`4`,`6` → `4.6`)
    pub joined: bool,
    start: usize,
    end: usize,
}

fn is_short_digits(token: &str) -> bool {
    !token.is_empty() && token.len() <= 2 && token.chars().all(|c| c.is_ascii_digit())
}

/// `^\d+(\.\d+)?$` with 1-2 digit parts, optionally `o`-suffixed
pub fn is_version_token(token: &str, allow_o_suffix: bool) -> bool {
    let body = if allow_o_suffix {
        token.strip_suffix('o').unwrap_or(token)
    } else {
        token
    };
    let mut parts = body.split('.');
    let major = parts.next().unwrap_or("");
    let minor = parts.next();
    if parts.next().is_some() || !is_short_digits(major) {
        return false;
    }
    minor.map_or(true, is_short_digits)
}

fn version_candidates(tokens: &[String], allow_o_suffix: bool) -> Vec<Version> {
    let mut candidates = Vec::new();
    let mut idx = 0;
    while idx < tokens.len() {
        let token = &tokens[idx];
        if !is_version_token(token, allow_o_suffix) {
            idx += 1;
            continue;
        }
        let next = tokens.get(idx + 1);
        if is_short_digits(token) && next.is_some_and(|n| is_short_digits(n)) {
            let minor = next.map(String::as_str).unwrap_or_default();
            candidates.push(Version {
                text: format!("{}.{}", token, minor),
                joined: true,
                start: idx,
                end: idx + 1,
            });
            idx += 2;
        } else {
            candidates.push(Version {
                text: token.clone(),
                joined: false,
                start: idx,
                end: idx,
            });
            idx += 1;
        }
    }
    candidates
}

/// Version token nearest to `anchor` (the first variant token).
///
/// Without an anchor the first candidate wins. Ties go to the side named by
/// `prefer_after`.
pub fn extract_version(
    tokens: &[String],
    anchor: Option<usize>,
    allow_o_suffix: bool,
    prefer_after: bool,
) -> Option<Version> {
    let candidates = version_candidates(tokens, allow_o_suffix);
    let Some(anchor) = anchor else {
        return candidates.into_iter().next();
    };

    candidates.into_iter().min_by_key(|v| {
        let (distance, after) = if v.start > anchor {
            (v.start - anchor, true)
        } else if v.end < anchor {
            (anchor - v.end, false)
        } else {
            (0, true)
        };
        (distance, after != prefer_after)
    })
}
