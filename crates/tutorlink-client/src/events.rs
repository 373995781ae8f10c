use serde::Serialize;
use tokio::sync::broadcast;

use tutorlink_shared::PrincipalId;

/// Capacity of the session event channel.  Slow subscribers that fall this
/// far behind see `RecvError::Lagged` and skip ahead.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected { principal: PrincipalId },
    Disconnected { reason: String },
    ReconnectFailed { principal: PrincipalId, error: String },
}

pub fn emit_event(tx: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    // No subscribers is not an error.
    if tx.send(event).is_err() {
        tracing::trace!("Session event dropped, no subscribers");
    }
}
