use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use tutorlink_shared::constants::TOKEN_PATH;
use tutorlink_shared::{token, IssuedToken, TokenRequest};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

const MAX_PRINCIPAL_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub rate_limiter: RateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(TOKEN_PATH, post(issue_token))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn issue_token(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<IssuedToken>, ServerError> {
    verify_api_key(&headers, &state.config)?;

    let principal = &req.principal_id;
    if principal.as_str().trim().is_empty() {
        return Err(ServerError::BadRequest("principal_id must not be empty".into()));
    }
    if principal.as_str().len() > MAX_PRINCIPAL_ID_LEN {
        return Err(ServerError::BadRequest(format!(
            "principal_id exceeds {MAX_PRINCIPAL_ID_LEN} bytes"
        )));
    }

    let issued = token::mint(&state.config.token_secret, principal, state.config.token_ttl());
    info!(principal = %principal, expires_at = %issued.expires_at, "Issued session token");
    Ok(Json(issued))
}

fn verify_api_key(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.issuer_api_key else {
        return Ok(());
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let presented = auth.strip_prefix("Bearer ").unwrap_or(auth).as_bytes();

    if presented.len() != expected.len() || presented.ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
        return Err(ServerError::Unauthorized("invalid API key".into()));
    }
    Ok(())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting credential authority");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
