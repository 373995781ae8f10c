//! Short-lived session tokens.
//!
//! Wire format: `base64url(json claims) "." hex(blake3 keyed MAC over the
//! encoded claims)`.  The MAC key is the 32-byte secret shared between the
//! credential authority and the messaging backend.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::KDF_CONTEXT_DEV_TOKEN;
use crate::error::TokenError;
use crate::types::PrincipalId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: PrincipalId,
    pub iat: i64,
    pub exp: i64,
    /// Unique per issuance, so two tokens for the same principal never collide.
    pub jti: Uuid,
}

impl TokenClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Body of a token request sent to the credential authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub principal_id: PrincipalId,
}

/// A token as handed out by the credential authority.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub fn mint(secret: &[u8; 32], principal: &PrincipalId, ttl: Duration) -> IssuedToken {
    mint_at(secret, principal, Utc::now(), ttl)
}

pub fn mint_at(
    secret: &[u8; 32],
    principal: &PrincipalId,
    issued_at: DateTime<Utc>,
    ttl: Duration,
) -> IssuedToken {
    let expires_at = issued_at + ttl;
    let claims = TokenClaims {
        sub: principal.clone(),
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
        jti: Uuid::new_v4(),
    };

    // Serializing a plain struct of strings and integers cannot fail.
    let json = serde_json::to_vec(&claims).unwrap_or_default();
    let payload = URL_SAFE_NO_PAD.encode(json);
    let mac = blake3::keyed_hash(secret, payload.as_bytes());

    IssuedToken {
        token: format!("{payload}.{}", mac.to_hex()),
        expires_at: claims.expires_at(),
    }
}

pub fn verify(secret: &[u8; 32], token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
    let (payload, mac_hex) = token
        .split_once('.')
        .ok_or_else(|| TokenError::Malformed("missing separator".into()))?;

    let provided = blake3::Hash::from_hex(mac_hex)
        .map_err(|e| TokenError::Malformed(format!("bad mac: {e}")))?;
    // blake3::Hash equality is constant-time.
    if blake3::keyed_hash(secret, payload.as_bytes()) != provided {
        return Err(TokenError::BadSignature);
    }

    let json = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("bad payload encoding: {e}")))?;
    let claims: TokenClaims = serde_json::from_slice(&json)
        .map_err(|e| TokenError::Malformed(format!("bad claims: {e}")))?;

    if now.timestamp() >= claims.exp {
        return Err(TokenError::Expired(claims.expires_at()));
    }

    Ok(claims)
}

/// Deterministic secret used when no real secret is configured.
/// Only debug builds of the authority and the `dev-tokens` minter use it.
pub fn dev_secret() -> [u8; 32] {
    blake3::derive_key(KDF_CONTEXT_DEV_TOKEN, b"tutorlink-development")
}
