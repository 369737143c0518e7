//! Telemetry storage layer
//!
//! Persists deduplicated telemetry events and poll-engine snapshots to
//! SQLite. Both tables are keyed by a content fingerprint, so `INSERT OR
//! IGNORE` makes re-delivery a no-op reported as `Deduped`.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::FromRow;

use super::{fingerprint_of, TelemetryEvent};
use crate::db::Database;
use crate::error::Result;
use crate::models::Snapshot;

/// Result of writing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested,
    Deduped,
}

/// Bound parameters per fingerprint lookup, below SQLite's default limit
const FINGERPRINT_CHUNK: usize = 500;

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexical comparison matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Dedup key of a poll-engine snapshot
pub fn snapshot_fingerprint(snapshot: &Snapshot) -> String {
    fingerprint_of(&[
        &snapshot.provider_id,
        &snapshot.account_id,
        &snapshot.timestamp.to_rfc3339(),
    ])
}

// ============================================================================
// Query Row Types
// ============================================================================

/// Per-model aggregate over matching events
#[derive(Debug, Clone, FromRow)]
pub struct ModelTotalsRow {
    pub model_raw: String,
    pub input_tokens: Option<f64>,
    pub output_tokens: Option<f64>,
    pub cached_tokens: Option<f64>,
    pub reasoning_tokens: Option<f64>,
    pub total_tokens: Option<f64>,
    pub cost_usd: Option<f64>,
    pub requests: Option<f64>,
    pub events: i64,
}

/// Per-day aggregate over matching events
#[derive(Debug, Clone, FromRow)]
pub struct DailyTotalsRow {
    pub day: String,
    pub total_tokens: Option<f64>,
    pub cost_usd: Option<f64>,
    pub requests: Option<f64>,
}

/// Per-day, per-model token totals
#[derive(Debug, Clone, FromRow)]
pub struct DailyModelRow {
    pub day: String,
    pub model_raw: String,
    pub total_tokens: Option<f64>,
}

/// Per-client token totals
#[derive(Debug, Clone, FromRow)]
pub struct ClientTotalsRow {
    pub client: String,
    pub total_tokens: Option<f64>,
}

/// Events belonging to a snapshot: same account, or no account and the
/// same provider
const MATCH_CLAUSE: &str =
    "(account_id = ?1 OR (account_id IS NULL AND provider_id = ?2)) AND occurred_at >= ?3";

// ============================================================================
// TelemetryStore
// ============================================================================

/// Deduplicating store for telemetry events and quota snapshots
#[derive(Clone)]
pub struct TelemetryStore {
    db: Database,
}

impl TelemetryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the store at `path`, running migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path).await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Insert one event unless its fingerprint is already stored
    pub async fn ingest_event(&self, event: &TelemetryEvent) -> Result<IngestOutcome> {
        let payload = serde_json::to_string(&event.payload)?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO telemetry_events
            (fingerprint, source_system, session_id, sequence, message_id, occurred_at,
             provider_id, account_id, client, model_raw, input_tokens, output_tokens,
             cached_tokens, reasoning_tokens, total_tokens, cost_usd, requests, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.fingerprint())
        .bind(&event.source_system)
        .bind(&event.session_id)
        .bind(event.sequence as i64)
        .bind(&event.message_id)
        .bind(format_timestamp(&event.occurred_at))
        .bind(&event.provider_id)
        .bind(&event.account_id)
        .bind(&event.client)
        .bind(&event.model_raw)
        .bind(event.input_tokens)
        .bind(event.output_tokens)
        .bind(event.cached_tokens)
        .bind(event.reasoning_tokens)
        .bind(event.effective_total_tokens())
        .bind(event.cost_usd)
        .bind(event.requests)
        .bind(payload)
        .execute(&self.db.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            IngestOutcome::Ingested
        } else {
            IngestOutcome::Deduped
        })
    }

    /// Which of `fingerprints` already have a stored event
    pub async fn stored_fingerprints(&self, fingerprints: &[String]) -> Result<HashSet<String>> {
        let mut stored = HashSet::new();
        for chunk in fingerprints.chunks(FINGERPRINT_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT fingerprint FROM telemetry_events WHERE fingerprint IN ({})",
                placeholders
            );
            let mut query = sqlx::query_as::<_, (String,)>(&sql);
            for fingerprint in chunk {
                query = query.bind(fingerprint);
            }
            for (fingerprint,) in query.fetch_all(&self.db.pool).await? {
                stored.insert(fingerprint);
            }
        }
        Ok(stored)
    }

    /// Insert one poll-engine snapshot unless already stored
    pub async fn ingest_snapshot(&self, snapshot: &Snapshot) -> Result<IngestOutcome> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO quota_snapshots
            (fingerprint, provider_id, account_id, status, captured_at,
             metrics, model_usage, daily_series, message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot_fingerprint(snapshot))
        .bind(&snapshot.provider_id)
        .bind(&snapshot.account_id)
        .bind(snapshot.status.to_string())
        .bind(format_timestamp(&snapshot.timestamp))
        .bind(serde_json::to_string(&snapshot.metrics)?)
        .bind(serde_json::to_string(&snapshot.model_usage)?)
        .bind(serde_json::to_string(&snapshot.daily_series)?)
        .bind(&snapshot.message)
        .execute(&self.db.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            IngestOutcome::Ingested
        } else {
            IngestOutcome::Deduped
        })
    }

    pub async fn event_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM telemetry_events")
            .fetch_one(&self.db.pool)
            .await?;
        Ok(count)
    }

    pub async fn snapshot_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM quota_snapshots")
            .fetch_one(&self.db.pool)
            .await?;
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Overlay queries
    // ------------------------------------------------------------------------

    /// Number of events matching a snapshot since `since`
    pub async fn matching_event_count(
        &self,
        account_id: &str,
        provider_id: &str,
        since: &DateTime<Utc>,
    ) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM telemetry_events WHERE {}", MATCH_CLAUSE);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(account_id)
            .bind(provider_id)
            .bind(format_timestamp(since))
            .fetch_one(&self.db.pool)
            .await?;
        Ok(count)
    }

    pub async fn model_totals(
        &self,
        account_id: &str,
        provider_id: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<ModelTotalsRow>> {
        let sql = format!(
            r#"
            SELECT model_raw,
                   SUM(input_tokens) AS input_tokens,
                   SUM(output_tokens) AS output_tokens,
                   SUM(cached_tokens) AS cached_tokens,
                   SUM(reasoning_tokens) AS reasoning_tokens,
                   SUM(total_tokens) AS total_tokens,
                   SUM(cost_usd) AS cost_usd,
                   SUM(requests) AS requests,
                   COUNT(*) AS events
            FROM telemetry_events
            WHERE {} AND model_raw != ''
            GROUP BY model_raw
            ORDER BY model_raw
            "#,
            MATCH_CLAUSE
        );
        let rows = sqlx::query_as::<_, ModelTotalsRow>(&sql)
            .bind(account_id)
            .bind(provider_id)
            .bind(format_timestamp(since))
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows)
    }

    pub async fn daily_totals(
        &self,
        account_id: &str,
        provider_id: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<DailyTotalsRow>> {
        let sql = format!(
            r#"
            SELECT substr(occurred_at, 1, 10) AS day,
                   SUM(total_tokens) AS total_tokens,
                   SUM(cost_usd) AS cost_usd,
                   SUM(requests) AS requests
            FROM telemetry_events
            WHERE {}
            GROUP BY day
            ORDER BY day
            "#,
            MATCH_CLAUSE
        );
        let rows = sqlx::query_as::<_, DailyTotalsRow>(&sql)
            .bind(account_id)
            .bind(provider_id)
            .bind(format_timestamp(since))
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows)
    }

    pub async fn daily_model_totals(
        &self,
        account_id: &str,
        provider_id: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<DailyModelRow>> {
        let sql = format!(
            r#"
            SELECT substr(occurred_at, 1, 10) AS day,
                   model_raw,
                   SUM(total_tokens) AS total_tokens
            FROM telemetry_events
            WHERE {} AND model_raw != ''
            GROUP BY day, model_raw
            ORDER BY day, model_raw
            "#,
            MATCH_CLAUSE
        );
        let rows = sqlx::query_as::<_, DailyModelRow>(&sql)
            .bind(account_id)
            .bind(provider_id)
            .bind(format_timestamp(since))
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows)
    }

    pub async fn client_totals(
        &self,
        account_id: &str,
        provider_id: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<ClientTotalsRow>> {
        let sql = format!(
            r#"
            SELECT client, SUM(total_tokens) AS total_tokens
            FROM telemetry_events
            WHERE {} AND client IS NOT NULL AND client != ''
            GROUP BY client
            ORDER BY client
            "#,
            MATCH_CLAUSE
        );
        let rows = sqlx::query_as::<_, ClientTotalsRow>(&sql)
            .bind(account_id)
            .bind(provider_id)
            .bind(format_timestamp(since))
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SnapshotStatus;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn setup_store() -> (TelemetryStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = TelemetryStore::open(dir.path().join("test.db")).await.unwrap();
        (store, dir)
    }

    fn event(seq: u64, model: &str) -> TelemetryEvent {
        TelemetryEvent::new("claude_code", "claude_code", "session-1", seq, Utc::now())
            .with_model(model)
            .with_tokens(100.0, 50.0)
            .with_cost(0.01)
    }

    #[tokio::test]
    async fn test_reingest_is_deduped() {
        let (store, _dir) = setup_store().await;
        let e = event(1, "claude-opus-4-6");

        assert_eq!(store.ingest_event(&e).await.unwrap(), IngestOutcome::Ingested);
        assert_eq!(store.ingest_event(&e).await.unwrap(), IngestOutcome::Deduped);
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stored_fingerprints() {
        let (store, _dir) = setup_store().await;
        store.ingest_event(&event(1, "claude-opus-4-6")).await.unwrap();

        let known = event(1, "claude-opus-4-6").fingerprint();
        let unknown = event(2, "claude-opus-4-6").fingerprint();
        let stored = store
            .stored_fingerprints(&[known.clone(), unknown.clone()])
            .await
            .unwrap();

        assert!(stored.contains(&known));
        assert!(!stored.contains(&unknown));
        assert!(store.stored_fingerprints(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_ingest_is_deduped() {
        let (store, _dir) = setup_store().await;
        let snap = Snapshot::new("cursor", "acct").with_status(SnapshotStatus::Ok);

        assert_eq!(store.ingest_snapshot(&snap).await.unwrap(), IngestOutcome::Ingested);
        assert_eq!(store.ingest_snapshot(&snap).await.unwrap(), IngestOutcome::Deduped);
        assert_eq!(store.snapshot_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_model_totals_match_by_account_or_provider() {
        let (store, _dir) = setup_store().await;
        store.ingest_event(&event(1, "claude-opus-4-6")).await.unwrap();
        store.ingest_event(&event(2, "claude-opus-4-6")).await.unwrap();
        store
            .ingest_event(&event(3, "claude-sonnet-4-5").with_account("other-acct"))
            .await
            .unwrap();
        store
            .ingest_event(&event(4, "claude-haiku-4-5").with_account("acct-1"))
            .await
            .unwrap();

        let since = Utc::now() - Duration::days(30);
        let rows = store.model_totals("acct-1", "claude_code", &since).await.unwrap();

        assert_eq!(rows.len(), 2);
        let opus = rows.iter().find(|r| r.model_raw == "claude-opus-4-6").unwrap();
        assert_eq!(opus.total_tokens, Some(300.0));
        assert_eq!(opus.events, 2);
        assert!(rows.iter().any(|r| r.model_raw == "claude-haiku-4-5"));
        assert_eq!(
            store.matching_event_count("acct-1", "claude_code", &since).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_window_excludes_old_events() {
        let (store, _dir) = setup_store().await;
        let mut old = event(1, "claude-opus-4-6");
        old.occurred_at = Utc::now() - Duration::days(45);
        store.ingest_event(&old).await.unwrap();
        store.ingest_event(&event(2, "claude-opus-4-6")).await.unwrap();

        let since = Utc::now() - Duration::days(30);
        let daily = store.daily_totals("acct", "claude_code", &since).await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].day, Utc::now().format("%Y-%m-%d").to_string());
        assert_eq!(daily[0].total_tokens, Some(150.0));
    }

    #[tokio::test]
    async fn test_client_totals() {
        let (store, _dir) = setup_store().await;
        store
            .ingest_event(&event(1, "claude-opus-4-6").with_client("vscode"))
            .await
            .unwrap();
        store.ingest_event(&event(2, "claude-opus-4-6")).await.unwrap();

        let since = Utc::now() - Duration::days(1);
        let clients = store.client_totals("acct", "claude_code", &since).await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].client, "vscode");
        assert_eq!(clients[0].total_tokens, Some(150.0));
    }
}
