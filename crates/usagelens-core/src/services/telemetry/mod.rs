//! Telemetry ingestion pipeline
//!
//! Collectors scrape usage events from local tool state, the spool stages
//! them durably on disk, and the pipeline drains the spool into the
//! deduplicating SQLite store in bounded batches.
//!
//! ```text
//! Collector ──▶ Spool (JSONL segments) ──flush──▶ TelemetryStore (SQLite)
//!                                                      ▲
//! PollEngine snapshots ──▶ QuotaSnapshotIngestor ──────┘
//! ```

pub mod auto_collector;
pub mod collectors;
pub mod ingestor;
pub mod pipeline;
pub mod spool;
pub mod store;

pub use auto_collector::{clamp_collect_interval, AutoCollectReport, AutoCollector};
pub use collectors::ClaudeCodeCollector;
pub use ingestor::{IngestSummary, QuotaSnapshotIngestor};
pub use pipeline::{FlushResult, Pipeline};
pub use spool::{Spool, SpoolEntry};
pub use store::{IngestOutcome, TelemetryStore};

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Separator between fingerprint components (ASCII unit separator)
pub(crate) const FINGERPRINT_SEPARATOR: char = '\u{1f}';

/// Lowercase hex SHA-256 of the given parts joined by the unit separator
pub(crate) fn fingerprint_of(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            let mut buf = [0u8; 4];
            hasher.update(FINGERPRINT_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(part.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ============================================================================
// Telemetry Event
// ============================================================================

/// One usage record scraped from a local tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Collector that produced the event (e.g. "claude_code")
    pub source_system: String,
    pub session_id: String,
    /// Position of the entry within its session (line number, row ID, ...)
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Client or project label the usage is attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default)]
    pub model_raw: String,
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
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    pub fn new(
        source_system: impl Into<String>,
        provider_id: impl Into<String>,
        session_id: impl Into<String>,
        sequence: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_system: source_system.into(),
            session_id: session_id.into(),
            sequence,
            message_id: None,
            occurred_at,
            provider_id: provider_id.into(),
            account_id: None,
            client: None,
            model_raw: String::new(),
            input_tokens: None,
            output_tokens: None,
            cached_tokens: None,
            reasoning_tokens: None,
            total_tokens: None,
            cost_usd: None,
            requests: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_model(mut self, model_raw: impl Into<String>) -> Self {
        self.model_raw = model_raw.into();
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_tokens(mut self, input: f64, output: f64) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    /// Stable dedup key: source system, session and message ID (or sequence
    /// when the tool has no message IDs)
    pub fn fingerprint(&self) -> String {
        let position = match self.message_id.as_deref().filter(|id| !id.is_empty()) {
            Some(message_id) => message_id.to_string(),
            None => self.sequence.to_string(),
        };
        fingerprint_of(&[&self.source_system, &self.session_id, &position])
    }

    /// Explicit total, else the sum of whichever token fields are present
    pub fn effective_total_tokens(&self) -> Option<f64> {
        self.total_tokens.or_else(|| {
            let parts = [
                self.input_tokens,
                self.output_tokens,
                self.cached_tokens,
                self.reasoning_tokens,
            ];
            if parts.iter().all(Option::is_none) {
                None
            } else {
                Some(parts.iter().flatten().sum())
            }
        })
    }
}

// ============================================================================
// Collector Options
// ============================================================================

/// Generic path bag handed to every collector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectOptions {
    paths: HashMap<String, Vec<PathBuf>>,
}

impl CollectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths<I, P>(mut self, key: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths
            .entry(key.into())
            .or_default()
            .extend(paths.into_iter().map(Into::into));
        self
    }

    /// First path under `key`
    pub fn path(&self, key: &str) -> Option<&PathBuf> {
        self.paths.get(key).and_then(|paths| paths.first())
    }

    pub fn paths(&self, key: &str) -> &[PathBuf] {
        self.paths.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ============================================================================
// Collector Trait
// ============================================================================

/// Scrapes usage events from one local tool
#[async_trait]
pub trait Collector: Send + Sync {
    /// Source system name stamped on every emitted event
    fn system(&self) -> &str;

    /// Read the tool's local state and return every usage event found.
    ///
    /// Re-collecting the same entries is expected; the store dedupes them.
    async fn collect(
        &self,
        ctx: &CancellationToken,
        options: &CollectOptions,
    ) -> Result<Vec<TelemetryEvent>>;
}
