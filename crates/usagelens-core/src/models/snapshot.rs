//! Snapshot types
//!
//! A `Snapshot` is the full usage/quota state of one account for one poll
//! cycle. Snapshots are never mutated after they enter the engine's map; the
//! next cycle supersedes them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::usage::ModelUsageRecord;

// ============================================================================
// Status
// ============================================================================

/// Health of an account as of its latest snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    Ok,
    NearLimit,
    Limited,
    AuthRequired,
    Unsupported,
    Error,
    #[default]
    Unknown,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SnapshotStatus::Ok => "OK",
            SnapshotStatus::NearLimit => "NEAR_LIMIT",
            SnapshotStatus::Limited => "LIMITED",
            SnapshotStatus::AuthRequired => "AUTH_REQUIRED",
            SnapshotStatus::Unsupported => "UNSUPPORTED",
            SnapshotStatus::Error => "ERROR",
            SnapshotStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", label)
    }
}

impl std::str::FromStr for SnapshotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OK" => Ok(SnapshotStatus::Ok),
            "NEAR_LIMIT" => Ok(SnapshotStatus::NearLimit),
            "LIMITED" => Ok(SnapshotStatus::Limited),
            "AUTH_REQUIRED" | "AUTH" => Ok(SnapshotStatus::AuthRequired),
            "UNSUPPORTED" => Ok(SnapshotStatus::Unsupported),
            "ERROR" => Ok(SnapshotStatus::Error),
            "UNKNOWN" | "" => Ok(SnapshotStatus::Unknown),
            _ => Err(format!("Unknown snapshot status: {}", s)),
        }
    }
}

// ============================================================================
// Metric
// ============================================================================

/// One quota/usage measurement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<f64>,
    /// Unit label ("tokens", "USD", "requests", "%", ...)
    #[serde(default)]
    pub unit: String,
    /// Window the measurement covers ("5h", "today", "7d", "30d", ...)
    #[serde(default)]
    pub window: String,
}

impl Metric {
    /// A metric that only reports a consumed amount
    pub fn used(value: f64, unit: impl Into<String>, window: impl Into<String>) -> Self {
        Self {
            used: Some(value),
            unit: unit.into(),
            window: window.into(),
            ..Default::default()
        }
    }

    /// A metric with a limit and a consumed amount
    pub fn with_limit(
        limit: f64,
        used: f64,
        unit: impl Into<String>,
        window: impl Into<String>,
    ) -> Self {
        Self {
            limit: Some(limit),
            used: Some(used),
            unit: unit.into(),
            window: window.into(),
            ..Default::default()
        }
    }

    /// First present of `used`, `remaining`, `limit`
    pub fn value(&self) -> Option<f64> {
        self.used.or(self.remaining).or(self.limit)
    }

    /// Percentage consumed, derived on demand from limit and used/remaining
    pub fn percent_used(&self) -> Option<f64> {
        let limit = self.limit.filter(|l| *l > 0.0)?;
        let used = match (self.used, self.remaining) {
            (Some(used), _) => used,
            (None, Some(remaining)) => limit - remaining,
            (None, None) => return None,
        };
        Some((used / limit * 100.0).clamp(0.0, 100.0))
    }
}

// ============================================================================
// Daily series
// ============================================================================

/// One aggregate for one UTC calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    /// Calendar day, `YYYY-MM-DD`
    pub date: String,
    pub value: f64,
}

impl TimePoint {
    pub fn new(date: impl Into<String>, value: f64) -> Self {
        Self {
            date: date.into(),
            value,
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Full usage/quota state of one account at one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub provider_id: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub metrics: HashMap<String, Metric>,
    #[serde(default)]
    pub resets: HashMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub diagnostics: HashMap<String, String>,
    /// Unclassified key/value pairs from the adapter; routed into
    /// `attributes`/`diagnostics` by the normalizer
    #[serde(default)]
    pub raw: HashMap<String, String>,
    #[serde(default)]
    pub model_usage: Vec<ModelUsageRecord>,
    #[serde(default)]
    pub daily_series: HashMap<String, Vec<TimePoint>>,
    #[serde(default)]
    pub message: String,
}

impl Snapshot {
    /// Create an empty snapshot stamped with the current time
    pub fn new(provider_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            account_id: account_id.into(),
            timestamp: Utc::now(),
            status: SnapshotStatus::Unknown,
            metrics: HashMap::new(),
            resets: HashMap::new(),
            attributes: HashMap::new(),
            diagnostics: HashMap::new(),
            raw: HashMap::new(),
            model_usage: Vec::new(),
            daily_series: HashMap::new(),
            message: String::new(),
        }
    }

    /// An `ERROR` snapshot carrying a human-readable message
    pub fn error(
        provider_id: impl Into<String>,
        account_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(provider_id, account_id)
            .with_status(SnapshotStatus::Error)
            .with_message(message)
    }

    pub fn with_status(mut self, status: SnapshotStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, metric: Metric) -> Self {
        self.metrics.insert(key.into(), metric);
        self
    }

    pub fn with_raw(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }

    pub fn with_series(mut self, key: impl Into<String>, points: Vec<TimePoint>) -> Self {
        self.daily_series.insert(key.into(), points);
        self
    }

    /// UTC calendar day of the snapshot, `YYYY-MM-DD`
    pub fn day(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}
