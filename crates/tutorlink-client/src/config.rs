//! Client configuration loaded from environment variables.
//!
//! Every setting has a default suitable for a local development stack.

use std::path::PathBuf;
use std::time::Duration;

use tutorlink_shared::constants::{
    DEFAULT_NETWORK_TIMEOUT_SECS, DEFAULT_TOKEN_PORT, RECONNECT_COOLDOWN_SECS, TOKEN_PATH,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Credential authority endpoint.
    /// Env: `TOKEN_ENDPOINT`
    /// Default: `http://127.0.0.1:8090/v1/token`
    pub token_endpoint: String,

    /// Bearer key presented to the credential authority.
    /// Env: `TOKEN_API_KEY`
    pub token_api_key: Option<String>,

    /// Upper bound on every token fetch, connect and channel operation.
    /// Env: `NETWORK_TIMEOUT_SECS`
    pub network_timeout: Duration,

    /// Minimum spacing between automatic reconnect attempts after a failure.
    /// Env: `RECONNECT_COOLDOWN_SECS`
    pub reconnect_cooldown: Duration,

    /// Metadata database file.  `None` uses the platform data directory.
    /// Env: `METADATA_DB_PATH`
    pub metadata_db_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_endpoint: format!("http://127.0.0.1:{DEFAULT_TOKEN_PORT}{TOKEN_PATH}"),
            token_api_key: None,
            network_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            reconnect_cooldown: Duration::from_secs(RECONNECT_COOLDOWN_SECS),
            metadata_db_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("TOKEN_ENDPOINT") {
            if !endpoint.is_empty() {
                config.token_endpoint = endpoint;
            }
        }

        if let Some(key) = lookup("TOKEN_API_KEY") {
            if !key.is_empty() {
                config.token_api_key = Some(key);
            }
        }

        if let Some(secs) = parse_secs(&lookup, "NETWORK_TIMEOUT_SECS") {
            config.network_timeout = secs;
        }

        if let Some(secs) = parse_secs(&lookup, "RECONNECT_COOLDOWN_SECS") {
            config.reconnect_cooldown = secs;
        }

        if let Some(path) = lookup("METADATA_DB_PATH") {
            if !path.is_empty() {
                config.metadata_db_path = Some(PathBuf::from(path));
            }
        }

        config
    }
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let value = lookup(key)?;
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            tracing::warn!(key, value = %value, "Invalid duration, using default");
            None
        }
    }
}
