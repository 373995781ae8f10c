use std::time::Duration;

use thiserror::Error;

use tutorlink_shared::{AuthError, BackendError, ChannelKey};
use tutorlink_store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Fetching a session token failed.  Retryable.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// No live session and none could be established right now.  Retryable
    /// once `retry_after` has elapsed.
    #[error("Connection unavailable: {reason}")]
    ConnectionUnavailable {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("No principal to connect as")]
    NoPrincipal,

    /// A principal or channel record is missing from the metadata store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A channel operation failed during reconciliation.  `local_applied`
    /// tells whether the handle's cache had already converged.
    #[error("Sync of {channel} failed: {source}")]
    Sync {
        channel: ChannelKey,
        local_applied: bool,
        #[source]
        source: BackendError,
    },

    #[error("Messaging backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Metadata store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(_) | Self::ConnectionUnavailable { .. } => true,
            Self::Sync { source, .. } | Self::Backend(source) => matches!(
                source,
                BackendError::Network(_) | BackendError::Timeout(_) | BackendError::NotConnected
            ),
            Self::Store(e) => e.is_timeout(),
            Self::NoPrincipal | Self::NotFound(_) => false,
        }
    }

    /// Whether the backend reported that the session is gone.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            Self::Backend(BackendError::NotConnected)
                | Self::Sync {
                    source: BackendError::NotConnected,
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
