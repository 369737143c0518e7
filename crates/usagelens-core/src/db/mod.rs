//! Database module - SQLx with SQLite

use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment override for the store location
pub const DB_PATH_ENV: &str = "USAGELENS_DB_PATH";

const DB_FILE_NAME: &str = "usagelens.db";

/// How long a connection waits on a locked database
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database state
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Open the database at the default path
    pub async fn new() -> Result<Self> {
        let db_path = get_db_path()?;
        Self::open(db_path).await
    }

    /// Open (creating if needed) the database at a specific path
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        log::info!("[db] Connecting to database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        log::info!("[db] Running database migrations...");

        // Deduplicated telemetry events scraped from local tools
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS telemetry_events (
                fingerprint TEXT PRIMARY KEY,
                source_system TEXT NOT NULL,
                session_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                message_id TEXT,
                occurred_at DATETIME NOT NULL,
                provider_id TEXT NOT NULL,
                account_id TEXT,
                client TEXT,
                model_raw TEXT NOT NULL DEFAULT '',
                input_tokens REAL,
                output_tokens REAL,
                cached_tokens REAL,
                reasoning_tokens REAL,
                total_tokens REAL,
                cost_usd REAL,
                requests REAL,
                payload TEXT NOT NULL DEFAULT 'null',
                ingested_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_telemetry_provider_time ON telemetry_events(provider_id, occurred_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_telemetry_account_time ON telemetry_events(account_id, occurred_at)")
            .execute(&self.pool)
            .await?;

        // Poll-engine snapshots, stored as an independent stream
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_snapshots (
                fingerprint TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                status TEXT NOT NULL,
                captured_at DATETIME NOT NULL,
                metrics TEXT NOT NULL DEFAULT '{}',
                model_usage TEXT NOT NULL DEFAULT '[]',
                daily_series TEXT NOT NULL DEFAULT '{}',
                message TEXT NOT NULL DEFAULT '',
                ingested_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quota_snapshots_account ON quota_snapshots(account_id, captured_at)")
            .execute(&self.pool)
            .await?;

        log::info!("[db] Database migrations completed");
        Ok(())
    }
}

/// Per-user data directory for the store and spool
pub fn data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "usagelens", "UsageLens")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Get database file path
/// Priority: USAGELENS_DB_PATH env var > default app data directory
pub fn get_db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(data_dir()?.join(DB_FILE_NAME))
}

/// Env var tests across modules must not run in parallel
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
