//! Bulk refresh of every channel a principal belongs to.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use tutorlink_net::{ChannelFilter, ChannelHandle, MessagingBackend};
use tutorlink_shared::{ChannelKey, PrincipalId};
use tutorlink_store::MetadataStore;

use crate::error::{ClientError, Result};
use crate::session::{bounded, bounded_lookup, SessionManager};
use crate::sync::{ChannelSynchronizer, ReconcileResult};

/// Result of reconciling one channel inside a batch.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: ChannelKey,
    pub result: Result<ReconcileResult>,
}

impl ChannelOutcome {
    /// Whether the handle's local cache ended up matching the record.
    pub fn is_converged(&self) -> bool {
        match &self.result {
            Ok(_) => true,
            Err(ClientError::Sync { local_applied, .. }) => *local_applied,
            Err(_) => false,
        }
    }
}

#[derive(Debug)]
pub struct RefreshReport {
    pub principal: PrincipalId,
    /// One entry per channel, in the backend's query order.
    pub outcomes: Vec<ChannelOutcome>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn results(&self) -> impl Iterator<Item = &ReconcileResult> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Channels whose local cache converged, including those whose remote
    /// write failed after the local patch.
    pub fn converged(&self) -> impl Iterator<Item = &ChannelKey> {
        self.outcomes
            .iter()
            .filter(|o| o.is_converged())
            .map(|o| &o.channel)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&ChannelKey, &ClientError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.channel, e)))
    }

    pub fn changed_count(&self) -> usize {
        self.results().filter(|r| r.changed).count()
    }
}

pub struct BulkRefresher {
    session: Arc<SessionManager>,
    store: Arc<dyn MetadataStore>,
    sync: Arc<ChannelSynchronizer>,
}

impl BulkRefresher {
    pub fn new(
        session: Arc<SessionManager>,
        store: Arc<dyn MetadataStore>,
        sync: Arc<ChannelSynchronizer>,
    ) -> Self {
        Self {
            session,
            store,
            sync,
        }
    }

    /// Reconnect as `principal` with a fresh token, then reconcile every
    /// channel the backend lists for them.  A failing channel is recorded
    /// in the report and does not stop the others.
    pub async fn refresh_all(&self, principal: &PrincipalId) -> Result<RefreshReport> {
        self.session.force_reconnect(Some(principal)).await?;
        let generation = self.session.generation();
        let limit = self.session.network_timeout();

        let outcomes = self
            .session
            .with_connection(|backend| async move {
                let filter = ChannelFilter::member_of(principal.clone());
                let handles = bounded(limit, backend.query_channels(&filter)).await?;
                info!(principal = %principal, channels = handles.len(), "Refreshing channels");

                let outcomes = join_all(
                    handles
                        .iter()
                        .map(|handle| self.refresh_one(backend.as_ref(), handle.as_ref())),
                )
                .await;
                Ok(outcomes)
            })
            .await?;

        // Per-channel failures never reach `with_connection`'s own check.
        if outcomes
            .iter()
            .any(|o| matches!(&o.result, Err(e) if e.is_session_lost()))
        {
            self.session
                .session_lost_in(generation, "backend dropped the session during refresh")
                .await;
        }

        let report = RefreshReport {
            principal: principal.clone(),
            outcomes,
        };
        info!(
            principal = %principal,
            total = report.outcomes.len(),
            changed = report.changed_count(),
            failed = report.failed().count(),
            "Channel refresh finished"
        );
        Ok(report)
    }

    async fn refresh_one(
        &self,
        backend: &dyn MessagingBackend,
        handle: &dyn ChannelHandle,
    ) -> ChannelOutcome {
        let key = handle.key().clone();
        let limit = self.session.network_timeout();
        let result = match bounded_lookup(limit, self.store.channel_record(&key)).await {
            Ok(record) => self.sync.reconcile(backend, handle, &record).await,
            Err(e) => Err(e.into()),
        };
        if let Err(ref e) = result {
            warn!(channel = %key, error = %e, "Channel reconcile failed, continuing batch");
        }
        ChannelOutcome {
            channel: key,
            result,
        }
    }
}
