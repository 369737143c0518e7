//! Provider adapter trait and error types
//!
//! A provider adapter knows how to turn one configured account into a
//! `Snapshot`. The poll engine holds adapters as `Arc<dyn ProviderAdapter>`
//! and looks them up by `id()`.

pub mod claude_local;
pub mod claude_logs;
pub mod probe_cache;

pub use claude_local::ClaudeLocalProvider;
pub use probe_cache::ProbeCache;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{Account, Snapshot, SnapshotStatus};

// ============================================================================
// Error Types
// ============================================================================

/// Errors an adapter can return instead of a snapshot
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Tool or provider is not installed or configured locally
    #[error("Provider not installed: {0}")]
    NotInstalled(String),

    /// Authentication failed or the credential is invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Upstream API returned an error
    #[error("API error: {0}")]
    ApiError(String),

    /// Response or local state could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// OAuth token has expired
    #[error("Token expired")]
    TokenExpired,

    /// I/O error (reading local logs, config files, ...)
    #[error("IO error: {0}")]
    IoError(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Snapshot status to report for a fetch that failed with this error
    pub fn status(&self) -> SnapshotStatus {
        match self {
            ProviderError::Unauthorized(_) | ProviderError::TokenExpired => {
                SnapshotStatus::AuthRequired
            }
            ProviderError::NotInstalled(_) => SnapshotStatus::Unsupported,
            _ => SnapshotStatus::Error,
        }
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::ParseError(err.to_string())
    }
}

// ============================================================================
// Adapter Trait
// ============================================================================

/// Trait for usage/quota providers
///
/// Implement this trait to add support for a new vendor or local tool.
/// Failing adapters return an error rather than a malformed snapshot; the
/// engine converts the error into a snapshot carrying its text.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use usagelens_core::models::{Account, Metric, Snapshot, SnapshotStatus};
/// use usagelens_core::services::providers::{ProviderAdapter, ProviderError};
/// use tokio_util::sync::CancellationToken;
///
/// struct MyProvider;
///
/// #[async_trait]
/// impl ProviderAdapter for MyProvider {
///     fn id(&self) -> &str {
///         "my_provider"
///     }
///
///     async fn fetch(
///         &self,
///         _ctx: &CancellationToken,
///         account: &Account,
///     ) -> Result<Snapshot, ProviderError> {
///         Ok(Snapshot::new(self.id(), &account.id)
///             .with_status(SnapshotStatus::Ok)
///             .with_metric("today_api_cost", Metric::used(1.25, "USD", "today")))
///     }
/// }
/// ```
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider ID this adapter serves (matches `Account::provider_id`)
    fn id(&self) -> &str;

    /// Metric keys this provider is expected to report.
    ///
    /// Keys missing from a fetched snapshot are listed in its
    /// `widget_missing_metrics` diagnostic.
    fn declared_metrics(&self) -> &[&'static str] {
        &[]
    }

    /// Fetch the current usage state of one account.
    ///
    /// `ctx` is cancelled when the caller shuts down. Adapters may watch it to
    /// stop early; the engine itself never drops an in-flight fetch and only
    /// bounds it with the fetch timeout.
    async fn fetch(
        &self,
        ctx: &CancellationToken,
        account: &Account,
    ) -> Result<Snapshot, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProviderError = io_err.into();
        assert!(matches!(err, ProviderError::IoError(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_provider_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: ProviderError = json_err.into();
        assert!(matches!(err, ProviderError::ParseError(_)));
    }

    #[test]
    fn test_provider_error_status() {
        assert_eq!(
            ProviderError::Unauthorized("bad key".to_string()).status(),
            SnapshotStatus::AuthRequired
        );
        assert_eq!(ProviderError::TokenExpired.status(), SnapshotStatus::AuthRequired);
        assert_eq!(
            ProviderError::NotInstalled("cursor".to_string()).status(),
            SnapshotStatus::Unsupported
        );
        assert_eq!(
            ProviderError::NetworkError("reset".to_string()).status(),
            SnapshotStatus::Error
        );
    }
}
