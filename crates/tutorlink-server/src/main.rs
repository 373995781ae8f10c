//! # tutorlink-server
//!
//! Credential authority for the tutorlink messaging backend.  Issues
//! short-lived session tokens over HTTP:
//!
//! - `POST /v1/token` with `{"principal_id": ...}` returns `{token, expires_at}`
//! - `GET /health`
//!
//! Tokens are MAC'd with the secret shared with the messaging backend.
//! Requests are rate limited per client IP and optionally require a bearer
//! API key.

mod api;
mod config;
mod error;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tutorlink_server=debug")),
        )
        .init();

    info!("Starting tutorlink credential authority v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env()?;
    info!(?config, "Loaded configuration");

    let rate_limiter = RateLimiter::from_config(&config);
    // Every 5 minutes, evict buckets idle for more than 10.
    rate_limiter.spawn_purge_task(Duration::from_secs(300), Duration::from_secs(600));

    let http_addr = config.http_addr;
    let state = AppState {
        config: Arc::new(config),
        rate_limiter,
    };

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
