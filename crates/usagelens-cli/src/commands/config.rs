//! Config commands
//!
//! Read-only views of the resolved configuration.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use usagelens_core::config::{CONFIG_PATH_ENV, SPOOL_DIR_ENV};
use usagelens_core::db::DB_PATH_ENV;
use usagelens_core::AccountConfig;

use super::Context;
use crate::output::{print_info, print_output, print_warning};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show resolved paths and settings
    Show,

    /// Get a single configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// List configured accounts
    Accounts,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

#[derive(Debug, Serialize, Tabled)]
pub struct AccountRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Provider")]
    pub provider: String,
    #[tabled(rename = "Auth")]
    pub auth_mode: String,
    #[tabled(rename = "Credential")]
    pub credential: String,
}

pub fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => print_output(&config_rows(ctx)?, ctx.format),
        ConfigAction::Get { key } => get_config(ctx, &key),
        ConfigAction::Accounts => {
            let rows: Vec<AccountRow> = ctx.config.accounts.iter().map(account_row).collect();
            print_output(&rows, ctx.format)
        }
    }
}

fn get_config(ctx: &Context, key: &str) -> Result<()> {
    let rows = config_rows(ctx)?;
    match rows.iter().find(|r| r.key.eq_ignore_ascii_case(key)) {
        Some(row) => print_info(&format!("{} = {}", row.key, row.value), false),
        None => print_warning(&format!("Config key not found: {}", key)),
    }
    Ok(())
}

fn source(env: &str, configured: bool) -> String {
    if std::env::var_os(env).is_some() {
        "env"
    } else if configured {
        "file"
    } else {
        "default"
    }
    .to_string()
}

/// Serialized name of a unit enum, as written in the config file
fn label<T: Serialize>(value: T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        _ => "-".to_string(),
    }
}

fn row(key: &str, value: impl ToString, source: &str) -> ConfigRow {
    ConfigRow {
        key: key.to_string(),
        value: value.to_string(),
        source: source.to_string(),
    }
}

fn config_rows(ctx: &Context) -> Result<Vec<ConfigRow>> {
    let config = &ctx.config;
    let mut rows = Vec::new();

    rows.push(ConfigRow {
        key: "config_path".to_string(),
        value: ctx.config_path.display().to_string(),
        source: source(CONFIG_PATH_ENV, false),
    });
    rows.push(ConfigRow {
        key: "db_path".to_string(),
        value: config.resolve_db_path()?.display().to_string(),
        source: source(DB_PATH_ENV, config.db_path.is_some()),
    });
    rows.push(ConfigRow {
        key: "spool_dir".to_string(),
        value: config.resolve_spool_dir()?.display().to_string(),
        source: source(SPOOL_DIR_ENV, config.spool_dir.is_some()),
    });

    rows.push(row("poll_interval_secs", config.poll_interval_secs, "resolved"));
    rows.push(row("fetch_timeout_secs", config.fetch_timeout_secs, "resolved"));
    rows.push(row("accounts", config.accounts.len(), "file"));

    let norm = &config.model_normalization;
    rows.push(row("model_normalization.enabled", norm.enabled, "resolved"));
    rows.push(row(
        "model_normalization.group_by",
        label(norm.group_by),
        "resolved",
    ));
    rows.push(row(
        "model_normalization.min_confidence",
        format!("{:.2}", norm.min_confidence),
        "resolved",
    ));
    rows.push(row(
        "model_normalization.overrides",
        norm.overrides.len(),
        "resolved",
    ));

    let telemetry = &config.telemetry;
    rows.push(row("telemetry.enabled", telemetry.enabled, "resolved"));
    rows.push(row(
        "telemetry.interval_secs",
        config.collect_interval().as_secs(),
        "resolved",
    ));
    rows.push(row(
        "telemetry.flush_batch_size",
        telemetry.flush_batch_size,
        "resolved",
    ));
    rows.push(row(
        "telemetry.flush_max_total",
        telemetry.flush_max_total,
        "resolved",
    ));

    let mut keys: Vec<&String> = telemetry.collector_paths.keys().collect();
    keys.sort();
    let options = config.collect_options();
    for key in keys {
        let paths: Vec<String> = options
            .paths(key)
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        rows.push(row(key, paths.join(", "), "file"));
    }

    Ok(rows)
}

fn account_row(account: &AccountConfig) -> AccountRow {
    let credential = match (&account.credential_env, &account.token) {
        (Some(name), _) if !name.trim().is_empty() => format!("env:{}", name.trim()),
        (_, Some(_)) => "****".to_string(),
        _ => "-".to_string(),
    };
    AccountRow {
        id: account.id.clone(),
        provider: account.provider.clone(),
        auth_mode: label(account.auth_mode),
        credential,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usagelens_core::AuthMode;

    #[test]
    fn test_account_row_masks_token() {
        let account = AccountConfig {
            id: "openai-work".to_string(),
            provider: "openai".to_string(),
            auth_mode: AuthMode::ApiKey,
            credential_env: None,
            token: Some("sk-secret".to_string()),
        };
        let row = account_row(&account);
        assert_eq!(row.credential, "****");
        assert_eq!(row.auth_mode, "api_key");
    }

    #[test]
    fn test_account_row_prefers_env() {
        let account = AccountConfig {
            id: "cursor".to_string(),
            provider: "cursor".to_string(),
            auth_mode: AuthMode::Oauth,
            credential_env: Some("CURSOR_TOKEN".to_string()),
            token: Some("ignored".to_string()),
        };
        assert_eq!(account_row(&account).credential, "env:CURSOR_TOKEN");
    }
}
