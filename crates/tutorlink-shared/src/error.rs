use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure to obtain a session token from the credential authority.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Credential authority unreachable: {0}")]
    NoResponse(String),

    #[error("Credential request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Credential authority rejected request ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Malformed credential response: {0}")]
    Malformed(String),
}

impl AuthError {
    /// `true` when the authority never answered, as opposed to answering "no".
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::NoResponse(_) | Self::Timeout(_))
    }
}

/// Errors reported by the messaging backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Authentication rejected: {0}")]
    Unauthenticated(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token signature mismatch")]
    BadSignature,

    #[error("Token expired at {0}")]
    Expired(DateTime<Utc>),
}
