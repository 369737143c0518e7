//! Application configuration
//!
//! Loaded from a TOML file. Location priority:
//! `USAGELENS_CONFIG` env var > `<config_dir>/config.toml`.
//! A missing file yields the defaults.
//!
//! ```toml
//! poll_interval_secs = 30
//!
//! [[accounts]]
//! id = "claude-main"
//! provider = "claude_code"
//! auth_mode = "local"
//!
//! [[accounts]]
//! id = "openai-work"
//! provider = "openai"
//! credential_env = "OPENAI_API_KEY"
//!
//! [model_normalization]
//! min_confidence = 0.8
//!
//! [telemetry]
//! interval_secs = 10
//! collector_paths = { "claude_code.projects" = ["~/.claude/projects"] }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::{data_dir, get_db_path, DB_PATH_ENV};
use crate::error::{Error, Result};
use crate::models::{Account, AuthMode, ModelNormalizationConfig};
use crate::services::engine::EngineConfig;
use crate::services::telemetry::auto_collector::{
    clamp_collect_interval, DEFAULT_COLLECT_INTERVAL,
};
use crate::services::telemetry::pipeline::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_TOTAL};
use crate::services::telemetry::CollectOptions;

/// Environment override for the config file
pub const CONFIG_PATH_ENV: &str = "USAGELENS_CONFIG";

/// Environment override for the spool directory
pub const SPOOL_DIR_ENV: &str = "USAGELENS_SPOOL_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";
const SPOOL_DIR_NAME: &str = "spool";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const MIN_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Account Config
// ============================================================================

/// One `[[accounts]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// Name of the env var holding the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    /// Literal credential; `credential_env` wins when both are set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl AccountConfig {
    pub fn to_account(&self) -> Account {
        let credential_ref = match (&self.credential_env, &self.token) {
            (Some(name), _) if !name.trim().is_empty() => format!("env:{}", name.trim()),
            (_, Some(token)) => token.clone(),
            _ => String::new(),
        };
        Account::new(self.id.trim(), self.provider.trim())
            .with_auth_mode(self.auth_mode)
            .with_credential(credential_ref)
    }
}

// ============================================================================
// Telemetry Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Auto-collect interval, clamped to 5-20s
    pub interval_secs: u64,
    pub flush_batch_size: usize,
    pub flush_max_total: usize,
    /// Collector option key -> paths (`~` is expanded)
    pub collector_paths: HashMap<String, Vec<String>>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_COLLECT_INTERVAL.as_secs(),
            flush_batch_size: DEFAULT_BATCH_SIZE,
            flush_max_total: DEFAULT_MAX_TOTAL,
            collector_paths: HashMap::new(),
        }
    }
}

// ============================================================================
// App Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub poll_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub accounts: Vec<AccountConfig>,
    pub model_normalization: ModelNormalizationConfig,
    pub telemetry: TelemetryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spool_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            accounts: Vec::new(),
            model_normalization: ModelNormalizationConfig::default(),
            telemetry: TelemetryConfig::default(),
            db_path: None,
            spool_dir: None,
        }
    }
}

impl AppConfig {
    /// Load from the resolved config path
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("[config] No config at {:?}, using defaults", path);
            return Self::default().validate();
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        let config = config.validate()?;
        log::info!(
            "[config] Loaded {} accounts from {:?}",
            config.accounts.len(),
            path
        );
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()
    }

    /// Clamp numeric settings into range and reject invalid accounts
    pub fn validate(mut self) -> Result<Self> {
        self.poll_interval_secs = self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS);
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = DEFAULT_FETCH_TIMEOUT_SECS;
        }
        self.model_normalization = self.model_normalization.validate();
        self.telemetry.interval_secs =
            clamp_collect_interval(Duration::from_secs(self.telemetry.interval_secs)).as_secs();
        self.telemetry.flush_batch_size = self.telemetry.flush_batch_size.max(1);
        self.telemetry.flush_max_total = self
            .telemetry
            .flush_max_total
            .max(self.telemetry.flush_batch_size);

        let mut seen = HashSet::new();
        for account in &self.accounts {
            let id = account.id.trim();
            if id.is_empty() {
                return Err(Error::validation("account id must not be empty"));
            }
            if account.provider.trim().is_empty() {
                return Err(Error::validation(format!(
                    "account '{}' has no provider",
                    id
                )));
            }
            if !seen.insert(id.to_string()) {
                return Err(Error::validation(format!("duplicate account id '{}'", id)));
            }
        }
        Ok(self)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.iter().map(AccountConfig::to_account).collect()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout_secs))
            .with_model_normalization(self.model_normalization.clone())
            .validate()
    }

    pub fn collect_interval(&self) -> Duration {
        clamp_collect_interval(Duration::from_secs(self.telemetry.interval_secs))
    }

    /// Collector paths with `~` expanded
    pub fn collect_options(&self) -> CollectOptions {
        let mut keys: Vec<&String> = self.telemetry.collector_paths.keys().collect();
        keys.sort();
        keys.into_iter().fold(CollectOptions::new(), |options, key| {
            let paths = self.telemetry.collector_paths[key]
                .iter()
                .map(|p| expand_path(p));
            options.with_paths(key.clone(), paths)
        })
    }

    /// Store path: `USAGELENS_DB_PATH` > `db_path` > default data dir
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        if std::env::var_os(DB_PATH_ENV).is_some() {
            return get_db_path();
        }
        match self.db_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Ok(expand_path(path)),
            None => get_db_path(),
        }
    }

    /// Spool directory: `USAGELENS_SPOOL_DIR` > `spool_dir` > default data dir
    pub fn resolve_spool_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(SPOOL_DIR_ENV) {
            return Ok(expand_path(&dir));
        }
        match self.spool_dir.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(dir) => Ok(expand_path(dir)),
            None => Ok(data_dir()?.join(SPOOL_DIR_NAME)),
        }
    }
}

/// Config file path
/// Priority: USAGELENS_CONFIG env var > default config directory
pub fn config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(expand_path(&path));
    }
    let dirs = directories::ProjectDirs::from("dev", "usagelens", "UsageLens")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;
    Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Expand `~` and `$VAR` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}
