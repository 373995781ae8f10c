//! Session lifecycle against the messaging backend.
//!
//! [`SessionManager::with_connection`] is the one entry point every backend
//! operation goes through.  It reconnects on demand, and makes sure that
//! concurrent callers racing a dead session cause exactly one token fetch
//! and one connect: callers queue on the reconnect gate, and whoever gets
//! it after a successful attempt finds the session already up.  After a
//! failed attempt the gate stays closed to automatic reconnects for the
//! cooldown period, so queued callers fail fast instead of hammering the
//! credential authority.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tutorlink_net::{CredentialProvider, MessagingBackend};
use tutorlink_shared::{AuthError, BackendError, PrincipalId};
use tutorlink_store::StoreError;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{emit_event, SessionEvent, EVENT_CHANNEL_CAPACITY};
use crate::state::SessionState;

/// Run one backend call under `limit`, mapping expiry to
/// [`BackendError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> std::result::Result<T, BackendError>
where
    F: Future<Output = std::result::Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}

/// Run one metadata-store lookup under `limit`.
pub(crate) async fn bounded_lookup<T, F>(limit: Duration, fut: F) -> std::result::Result<T, StoreError>
where
    F: Future<Output = std::result::Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[derive(Default)]
struct ReconnectGate {
    /// Earliest instant an automatic reconnect may be attempted again.
    retry_at: Option<Instant>,
}

impl ReconnectGate {
    fn remaining_cooldown(&self) -> Option<Duration> {
        self.retry_at
            .and_then(|at| at.checked_duration_since(Instant::now()))
            .filter(|wait| !wait.is_zero())
    }
}

pub struct SessionManager {
    backend: Arc<dyn MessagingBackend>,
    credentials: Arc<dyn CredentialProvider>,
    network_timeout: Duration,
    reconnect_cooldown: Duration,
    state: Mutex<SessionState>,
    /// Bumped on every successful connect.
    generation: AtomicU64,
    gate: tokio::sync::Mutex<ReconnectGate>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn MessagingBackend>,
        credentials: Arc<dyn CredentialProvider>,
        config: &ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            credentials,
            network_timeout: config.network_timeout,
            reconnect_cooldown: config.reconnect_cooldown,
            state: Mutex::new(SessionState::new()),
            generation: AtomicU64::new(0),
            gate: tokio::sync::Mutex::new(ReconnectGate::default()),
            events,
        }
    }

    /// Snapshot of the current session state.
    pub fn state(&self) -> SessionState {
        self.lock_state().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn network_timeout(&self) -> Duration {
        self.network_timeout
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Identifies the current session; changes on every successful connect.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run `op` against a live session, reconnecting first if needed.
    ///
    /// The operation's own failure is returned unchanged.  If it reports
    /// that the backend has no session, the session it ran against is
    /// marked lost so the next call reconnects.
    pub async fn with_connection<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn MessagingBackend>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_connected().await?;
        let generation = self.generation();

        let result = op(Arc::clone(&self.backend)).await;
        if matches!(&result, Err(e) if e.is_session_lost()) {
            self.session_lost_in(generation, "backend reported no session")
                .await;
        }
        result
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.lock_state().is_connected {
            return Ok(());
        }

        let mut gate = self.gate.lock().await;

        // The attempt we queued behind may have succeeded.
        if self.lock_state().is_connected {
            return Ok(());
        }

        if let Some(wait) = gate.remaining_cooldown() {
            debug!(retry_in_ms = wait.as_millis() as u64, "Reconnect suppressed during cooldown");
            return Err(ClientError::ConnectionUnavailable {
                reason: "previous reconnect failed, cooling down".into(),
                retry_after: Some(wait),
            });
        }

        let target = self
            .lock_state()
            .reconnect_target()
            .cloned()
            .ok_or(ClientError::NoPrincipal)?;
        // The backend may still hold the session we consider lost, or one
        // opened by a connect that timed out on our side.
        self.disconnect_locked("replacing stale session").await;
        self.reconnect_locked(&mut gate, target).await
    }

    /// Open a session as `principal`.  A session for another principal is
    /// closed first; a live session for the same principal is kept.
    pub async fn login(&self, principal: PrincipalId) -> Result<()> {
        let mut gate = self.gate.lock().await;

        {
            let state = self.lock_state();
            if state.is_connected && state.connected_principal.as_ref() == Some(&principal) {
                return Ok(());
            }
        }

        self.disconnect_locked("switching principal").await;
        self.reconnect_locked(&mut gate, principal).await
    }

    /// Close the session and forget the principal.
    pub async fn logout(&self) {
        let mut gate = self.gate.lock().await;
        self.disconnect_locked("logout").await;
        *self.lock_state() = SessionState::new();
        gate.retry_at = None;
        info!("Logged out");
    }

    /// Tear down the session and reconnect with a freshly fetched token,
    /// regardless of cooldown.  Targets `principal` when given, otherwise
    /// the current or last known principal.
    pub async fn force_reconnect(&self, principal: Option<&PrincipalId>) -> Result<()> {
        let mut gate = self.gate.lock().await;

        let target = match principal {
            Some(p) => p.clone(),
            None => self
                .lock_state()
                .reconnect_target()
                .cloned()
                .ok_or(ClientError::NoPrincipal)?,
        };

        self.disconnect_locked("forced reconnect").await;
        self.reconnect_locked(&mut gate, target).await
    }

    /// Record that the backend dropped the session.  The next
    /// `with_connection` call reconnects.
    pub async fn mark_session_lost(&self, reason: &str) {
        let _gate = self.gate.lock().await;
        self.mark_lost_locked(reason);
    }

    /// Like [`mark_session_lost`](Self::mark_session_lost), but ignored when
    /// the session has been replaced since `generation` was read.
    pub(crate) async fn session_lost_in(&self, generation: u64, reason: &str) {
        let _gate = self.gate.lock().await;
        if self.generation() != generation {
            debug!(reason, "Ignoring loss report from a replaced session");
            return;
        }
        self.mark_lost_locked(reason);
    }

    // -- Gate holders only -------------------------------------------------

    fn mark_lost_locked(&self, reason: &str) {
        let was_connected = {
            let mut state = self.lock_state();
            let was = state.is_connected;
            state.mark_disconnected();
            was
        };
        if was_connected {
            warn!(reason, "Messaging session lost");
            emit_event(
                &self.events,
                SessionEvent::Disconnected {
                    reason: reason.to_string(),
                },
            );
        }
    }

    async fn disconnect_locked(&self, reason: &str) {
        let was_connected = self.lock_state().is_connected;

        if let Err(e) = bounded(self.network_timeout, self.backend.disconnect_current_user()).await {
            warn!(error = %e, "Disconnect failed, continuing");
        }
        self.lock_state().mark_disconnected();

        if was_connected {
            debug!(reason, "Session closed");
            emit_event(
                &self.events,
                SessionEvent::Disconnected {
                    reason: reason.to_string(),
                },
            );
        }
    }

    async fn reconnect_locked(&self, gate: &mut ReconnectGate, target: PrincipalId) -> Result<()> {
        self.lock_state().is_reconnecting = true;
        info!(principal = %target, "Connecting to messaging backend");

        match self.open_session(&target).await {
            Ok(()) => {
                gate.retry_at = None;
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.lock_state().mark_connected(target.clone());
                info!(principal = %target, "Messaging session established");
                emit_event(&self.events, SessionEvent::Connected { principal: target });
                Ok(())
            }
            Err(e) => {
                gate.retry_at = Some(Instant::now() + self.reconnect_cooldown);
                {
                    let mut state = self.lock_state();
                    state.mark_disconnected();
                    state.last_known_principal = Some(target.clone());
                }
                warn!(
                    principal = %target,
                    error = %e,
                    cooldown_ms = self.reconnect_cooldown.as_millis() as u64,
                    "Reconnect failed"
                );
                emit_event(
                    &self.events,
                    SessionEvent::ReconnectFailed {
                        principal: target,
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Fetch a fresh token and connect with it.  The token is dropped once
    /// the connect call returns.
    async fn open_session(&self, principal: &PrincipalId) -> Result<()> {
        let limit = self.network_timeout;

        let token = match tokio::time::timeout(limit, self.credentials.session_token(principal)).await {
            Ok(issued) => issued?,
            Err(_) => return Err(AuthError::Timeout(limit).into()),
        };

        bounded(limit, self.backend.connect(principal, &token))
            .await
            .map_err(|e| ClientError::ConnectionUnavailable {
                reason: e.to_string(),
                retry_after: Some(self.reconnect_cooldown),
            })
    }
}
