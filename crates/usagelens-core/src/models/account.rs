use serde::{Deserialize, Serialize};

/// How an account authenticates against its provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// API key passed as a bearer token or header
    #[default]
    ApiKey,
    /// OAuth credentials managed by the vendor's CLI
    Oauth,
    /// Local tool state (session logs, databases); no remote credential
    Local,
    /// Anything else the adapter understands on its own
    Custom,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::ApiKey => write!(f, "api_key"),
            AuthMode::Oauth => write!(f, "oauth"),
            AuthMode::Local => write!(f, "local"),
            AuthMode::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api_key" | "apikey" | "key" | "token" => Ok(AuthMode::ApiKey),
            "oauth" => Ok(AuthMode::Oauth),
            "local" | "cli" => Ok(AuthMode::Local),
            "custom" => Ok(AuthMode::Custom),
            _ => Err(format!("Unknown auth mode: {}", s)),
        }
    }
}

/// One configured destination to poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable account identifier (unique across the configuration)
    pub id: String,
    /// Provider adapter that serves this account (e.g. "claude_code")
    pub provider_id: String,
    /// Authentication mode
    pub auth_mode: AuthMode,
    /// Reference to the credential: `env:<NAME>` or a literal token
    pub credential_ref: String,
}

impl Account {
    /// Create an account with the default auth mode and no credential
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            auth_mode: AuthMode::default(),
            credential_ref: String::new(),
        }
    }

    /// Set the auth mode
    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    /// Set the credential reference
    pub fn with_credential(mut self, credential_ref: impl Into<String>) -> Self {
        self.credential_ref = credential_ref.into();
        self
    }

    /// Resolve the credential value.
    ///
    /// `env:NAME` references are read from the environment; anything else is
    /// returned as-is. Empty references resolve to `None`.
    pub fn resolve_credential(&self) -> Option<String> {
        let reference = self.credential_ref.trim();
        if reference.is_empty() {
            return None;
        }
        match reference.strip_prefix("env:") {
            Some(name) => std::env::var(name).ok().filter(|v| !v.trim().is_empty()),
            None => Some(reference.to_string()),
        }
    }
}
