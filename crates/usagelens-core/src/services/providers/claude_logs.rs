//! Claude Code JSONL session logs
//!
//! Claude Code stores session data in JSONL files under `~/.claude/projects/`.
//! Assistant lines carry `message.model`, `message.usage`, `message.id`,
//! `requestId` and `timestamp`. The file stem is the session ID.
//!
//! Costs are estimated from `PRICES`, keyed by the canonical Claude variant
//! and the first major version a price applies to.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::ModelNormalizationConfig;
use crate::services::canonical::normalize_canonical_model;

// ============================================================================
// Pricing
// ============================================================================

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
struct Price {
    input: f64,
    output: f64,
    cache_write: f64,
    cache_read: f64,
}

/// Price of unknown or non-Claude models
const DEFAULT_PRICE: Price = Price { input: 3.0, output: 15.0, cache_write: 3.75, cache_read: 0.30 };

/// `(variant, since major version, price)`, newest first per variant.
/// Unversioned models take the newest row of their variant.
const PRICES: &[(&str, u32, Price)] = &[
    ("opus", 4, Price { input: 5.0, output: 25.0, cache_write: 6.25, cache_read: 0.50 }),
    ("opus", 0, Price { input: 15.0, output: 75.0, cache_write: 18.75, cache_read: 1.50 }),
    ("sonnet", 0, DEFAULT_PRICE),
    ("haiku", 0, Price { input: 0.80, output: 4.0, cache_write: 1.0, cache_read: 0.08 }),
];

// ============================================================================
// Types
// ============================================================================

/// Token usage of a single assistant message
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    pub fn cached_tokens(&self) -> u64 {
        self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// One assistant message with usage, as read from a session log
#[derive(Debug, Clone)]
pub struct ClaudeUsageLine {
    pub session_id: String,
    /// Zero-based line number within the session file
    pub sequence: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub model: String,
    pub message_id: String,
    pub request_id: String,
    pub cwd: Option<String>,
    pub usage: TokenUsage,
}

impl ClaudeUsageLine {
    /// Key shared by the streamed duplicates of one API response
    pub fn dedup_key(&self) -> Option<String> {
        if self.message_id.is_empty() && self.request_id.is_empty() {
            return None;
        }
        Some(format!("{}:{}", self.message_id, self.request_id))
    }

    pub fn cost_usd(&self) -> f64 {
        estimate_cost(&self.model, &self.usage)
    }
}

// ============================================================================
// JSONL Parsing Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonlLine {
    #[serde(rename = "type")]
    line_type: Option<String>,
    message: Option<MessageData>,
    timestamp: Option<String>,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    id: Option<String>,
    model: Option<String>,
    usage: Option<UsageData>,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

// ============================================================================
// Discovery and parsing
// ============================================================================

/// `~/.claude/projects`
pub fn default_projects_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}

/// All `.jsonl` files below `root`, sorted by path
pub fn find_jsonl_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("[claude_logs] Cannot read {:?}: {}", dir, e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "jsonl") {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

/// Parse one JSONL line; `None` for anything that is not an assistant
/// message with usage
pub fn parse_line(line: &str, session_id: &str, sequence: u64) -> Option<ClaudeUsageLine> {
    if !line.contains("\"assistant\"") {
        return None;
    }
    let parsed: JsonlLine = serde_json::from_str(line).ok()?;
    if parsed.line_type.as_deref() != Some("assistant") {
        return None;
    }

    let message = parsed.message?;
    let usage = message.usage?;
    let model = message.model?;
    if model.is_empty() || model == "<synthetic>" {
        return None;
    }

    Some(ClaudeUsageLine {
        session_id: session_id.to_string(),
        sequence,
        timestamp: parsed
            .timestamp
            .as_deref()
            .and_then(|ts| ts.parse::<DateTime<Utc>>().ok()),
        model,
        message_id: message.id.unwrap_or_default(),
        request_id: parsed.request_id.unwrap_or_default(),
        cwd: parsed.cwd,
        usage: TokenUsage {
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
        },
    })
}

/// Parse a whole session file, dropping streamed duplicates.
///
/// Lines without a timestamp inherit the file's modification time.
pub fn parse_session_file(path: &Path) -> std::io::Result<Vec<ClaudeUsageLine>> {
    let content = std::fs::read_to_string(path)?;
    let session_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);

    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(mut usage_line) = parse_line(line, &session_id, idx as u64) else {
            continue;
        };
        if let Some(key) = usage_line.dedup_key() {
            if !seen.insert(key) {
                continue;
            }
        }
        if usage_line.timestamp.is_none() {
            usage_line.timestamp = modified;
        }
        lines.push(usage_line);
    }
    Ok(lines)
}

/// Price row for a raw model name, resolved through its canonical identity
fn price_for(model: &str) -> Price {
    let identity = normalize_canonical_model(
        "claude_code",
        model,
        &ModelNormalizationConfig::default(),
    );
    if identity.family != "claude" {
        return DEFAULT_PRICE;
    }
    // "anthropic/claude-opus-4.6" -> 4
    let major = identity
        .lineage_id
        .rsplit('-')
        .next()
        .and_then(|version| version.split('.').next())
        .and_then(|major| major.parse::<u32>().ok());

    PRICES
        .iter()
        .find(|(variant, since, _)| {
            *variant == identity.variant && major.map_or(true, |m| m >= *since)
        })
        .map(|(_, _, price)| *price)
        .unwrap_or(DEFAULT_PRICE)
}

/// Estimated cost of one message, priced by model line
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let price = price_for(model);
    let per_token = |tokens: u64, usd_per_million: f64| {
        tokens as f64 * usd_per_million / 1_000_000.0
    };

    per_token(usage.input_tokens, price.input)
        + per_token(usage.output_tokens, price.output)
        + per_token(usage.cache_creation_tokens, price.cache_write)
        + per_token(usage.cache_read_tokens, price.cache_read)
}

// ============================================================================
// Tests
// ============================================================================
