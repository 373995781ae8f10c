//! Session state owned by the [`SessionManager`](crate::session::SessionManager).
//!
//! A [`SessionState`] snapshot is what callers observe through
//! `SessionManager::state()`.  The manager mutates it only while holding its
//! reconnect gate, so no snapshot ever shows "connected" together with
//! "reconnecting".

use serde::Serialize;

use tutorlink_shared::PrincipalId;

/// Coarse connection mode, derived from [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Disconnected,
    Reconnecting,
    Connected,
}

impl ConnectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Principal of the live session.  `None` while disconnected.
    pub connected_principal: Option<PrincipalId>,

    pub is_connected: bool,

    /// True only while a reconnect attempt is in flight.
    pub is_reconnecting: bool,

    /// Principal of the most recent session, kept across disconnects so a
    /// lost session can be re-established without the caller's help.
    pub last_known_principal: Option<PrincipalId>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ConnectionMode {
        if self.is_connected {
            ConnectionMode::Connected
        } else if self.is_reconnecting {
            ConnectionMode::Reconnecting
        } else {
            ConnectionMode::Disconnected
        }
    }

    /// The principal a reconnect should target.
    pub fn reconnect_target(&self) -> Option<&PrincipalId> {
        self.connected_principal
            .as_ref()
            .or(self.last_known_principal.as_ref())
    }

    pub(crate) fn mark_connected(&mut self, principal: PrincipalId) {
        self.connected_principal = Some(principal.clone());
        self.last_known_principal = Some(principal);
        self.is_connected = true;
        self.is_reconnecting = false;
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connected_principal = None;
        self.is_connected = false;
        self.is_reconnecting = false;
    }
}
