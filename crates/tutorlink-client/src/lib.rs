//! # tutorlink-client
//!
//! Keeps the messaging backend's view of chat channels consistent with the
//! metadata store.  Everything goes through [`ChatCore`]:
//!
//! - [`session`] owns the backend connection and serializes reconnects,
//! - [`provisioning`] creates backend users from metadata records,
//! - [`sync`] reconciles one channel against its record,
//! - [`refresh`] and [`fix`] run reconciliation in bulk or on demand.

pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod fix;
pub mod provisioning;
pub mod refresh;
pub mod session;
pub mod state;
pub mod sync;

#[cfg(test)]
mod test_support;

use tracing_subscriber::{fmt, EnvFilter};

pub use chat::ChatCore;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::SessionEvent;
pub use fix::FixOutcome;
pub use provisioning::{CollectionLookup, Provisioner, DEFAULT_LOOKUP_ORDER};
pub use refresh::{BulkRefresher, ChannelOutcome, RefreshReport};
pub use session::SessionManager;
pub use state::{ConnectionMode, SessionState};
pub use sync::{ChannelSynchronizer, ReconcileResult, RemoteWrite};

/// Install the global tracing subscriber.  `RUST_LOG` overrides the
/// default filter.  Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("tutorlink_client=debug,tutorlink_net=debug,tutorlink_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    tracing::info!("Starting {} client core", tutorlink_shared::constants::APP_NAME);
}
