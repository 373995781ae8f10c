//! Credential authority configuration loaded from environment variables.
//!
//! Everything except the signing secret has a default.  Debug builds fall
//! back to the shared development secret when `TOKEN_SECRET` is unset;
//! release builds refuse to start without one.

use std::fmt;
use std::net::SocketAddr;

use anyhow::{bail, Context};

use tutorlink_shared::constants::{DEFAULT_TOKEN_PORT, DEFAULT_TOKEN_TTL_SECS};
use tutorlink_shared::token::dev_secret;

#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8090`
    pub http_addr: SocketAddr,

    /// 32-byte MAC key shared with the messaging backend (64 hex chars).
    /// Env: `TOKEN_SECRET`
    pub token_secret: [u8; 32],

    /// Lifetime of issued tokens.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: `3600`
    pub token_ttl_secs: i64,

    /// Bearer key callers must present.  `None` leaves issuance open.
    /// Env: `ISSUER_API_KEY`
    pub issuer_api_key: Option<String>,

    /// Sustained requests per second per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Burst capacity per client IP.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("token_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("issuer_api_key", &self.issuer_api_key.as_ref().map(|_| "<redacted>"))
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .finish()
    }
}

impl ServerConfig {
    /// Defaults with the development secret.  Tests and debug builds only.
    pub fn development() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_TOKEN_PORT).into(),
            token_secret: dev_secret(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            issuer_api_key: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), cfg!(debug_assertions))
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        allow_dev_secret: bool,
    ) -> anyhow::Result<Self> {
        let mut config = Self::development();

        match lookup("TOKEN_SECRET").filter(|s| !s.trim().is_empty()) {
            Some(hex_secret) => {
                config.token_secret =
                    parse_hex_secret(&hex_secret).context("invalid TOKEN_SECRET")?;
            }
            None if allow_dev_secret => {
                tracing::warn!("TOKEN_SECRET not set, using the development secret");
            }
            None => bail!("TOKEN_SECRET must be set"),
        }

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(val) = lookup("TOKEN_TTL_SECS") {
            match val.parse::<i64>() {
                Ok(secs) if secs > 0 => config.token_ttl_secs = secs,
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_SECS, using default"),
            }
        }

        if let Some(key) = lookup("ISSUER_API_KEY") {
            if !key.is_empty() {
                config.issuer_api_key = Some(key);
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_SEC") {
            if let Ok(rate) = val.parse::<f64>() {
                if rate > 0.0 {
                    config.rate_limit_per_sec = rate;
                }
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            if let Ok(burst) = val.parse::<f64>() {
                if burst >= 1.0 {
                    config.rate_limit_burst = burst;
                }
            }
        }

        Ok(config)
    }
}

fn parse_hex_secret(value: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(value.trim()).context("not hex")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 32 bytes, got {len}"))
}
