//! Session token acquisition.
//!
//! A [`CredentialProvider`] performs a single request/response against the
//! credential authority.  It neither retries nor caches: every call asks for
//! a freshly issued token, and callers own the retry policy.  Failures are
//! split between "the authority never answered" ([`AuthError::NoResponse`],
//! [`AuthError::Timeout`]) and "the authority said no"
//! ([`AuthError::Rejected`]).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use tutorlink_shared::{AuthError, IssuedToken, PrincipalId, TokenRequest};

#[cfg(all(feature = "dev-tokens", not(debug_assertions)))]
compile_error!("the `dev-tokens` feature must never be enabled in a release build");

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn session_token(&self, principal: &PrincipalId) -> Result<IssuedToken, AuthError>;
}

// ---------------------------------------------------------------------------
// HTTP authority
// ---------------------------------------------------------------------------

/// Fetches tokens from the credential authority's HTTP endpoint.
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpCredentialProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::NoResponse(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn session_token(&self, principal: &PrincipalId) -> Result<IssuedToken, AuthError> {
        let mut request = self.client.post(&self.endpoint).json(&TokenRequest {
            principal_id: principal.clone(),
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout(self.timeout)
            } else {
                AuthError::NoResponse(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            warn!(principal = %principal, status = status.as_u16(), "Token request rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        let token: IssuedToken = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout(self.timeout)
            } else {
                AuthError::Malformed(e.to_string())
            }
        })?;

        debug!(principal = %principal, expires_at = %token.expires_at, "Session token issued");
        Ok(token)
    }
}

// ---------------------------------------------------------------------------
// Development fallback
// ---------------------------------------------------------------------------

/// Mints tokens locally with the development secret.
#[cfg(any(test, feature = "dev-tokens"))]
pub struct DevTokenMinter {
    secret: [u8; 32],
    ttl: chrono::Duration,
}

#[cfg(any(test, feature = "dev-tokens"))]
impl DevTokenMinter {
    pub fn new() -> Self {
        Self {
            secret: tutorlink_shared::token::dev_secret(),
            ttl: chrono::Duration::seconds(tutorlink_shared::constants::DEFAULT_TOKEN_TTL_SECS),
        }
    }
}

#[cfg(any(test, feature = "dev-tokens"))]
impl Default for DevTokenMinter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "dev-tokens"))]
#[async_trait]
impl CredentialProvider for DevTokenMinter {
    async fn session_token(&self, principal: &PrincipalId) -> Result<IssuedToken, AuthError> {
        warn!(principal = %principal, "Minting development session token");
        Ok(tutorlink_shared::token::mint(&self.secret, principal, self.ttl))
    }
}

/// Uses `primary`, falling back to `fallback` only when the primary
/// authority is unreachable.  A rejection is final.
#[cfg(any(test, feature = "dev-tokens"))]
pub struct FallbackCredentials<P, F> {
    primary: P,
    fallback: F,
}

#[cfg(any(test, feature = "dev-tokens"))]
impl<P, F> FallbackCredentials<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[cfg(any(test, feature = "dev-tokens"))]
#[async_trait]
impl<P, F> CredentialProvider for FallbackCredentials<P, F>
where
    P: CredentialProvider,
    F: CredentialProvider,
{
    async fn session_token(&self, principal: &PrincipalId) -> Result<IssuedToken, AuthError> {
        match self.primary.session_token(principal).await {
            Err(e) if e.is_unreachable() => {
                warn!(principal = %principal, error = %e, "Credential authority unreachable, using fallback");
                self.fallback.session_token(principal).await
            }
            other => other,
        }
    }
}
