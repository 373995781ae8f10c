//! Channel reconciliation.
//!
//! Brings one channel handle in line with its authoritative record in two
//! phases.  Phase 1 patches the handle's local cache so every reader of the
//! handle immediately observes the desired attributes.  Phase 2 attempts the
//! server-side write, which restricted-tier channels reject for
//! non-elevated members; that rejection is an expected outcome, not an
//! error.  Membership is then grown (never shrunk) to include every member
//! the record lists.
//!
//! A phase 2 that fails for any other reason leaves the channel pending:
//! the next reconcile pushes the write again even though the cache already
//! matches.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use tutorlink_net::{ChannelHandle, MessagingBackend};
use tutorlink_shared::{BackendError, ChannelAttributes, ChannelKey, ChannelRecord, PrincipalId};

use crate::error::{ClientError, Result};
use crate::provisioning::Provisioner;
use crate::session::bounded;

/// What happened to the server-side attribute write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteWrite {
    /// The server accepted the write.
    Applied,
    /// The server refused it; only the local cache was updated.
    PermissionDenied { reason: String },
    /// No write was needed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub channel: ChannelKey,
    /// Whether the cached attributes differed from the record.
    pub changed: bool,
    pub remote: RemoteWrite,
    pub members_added: Vec<PrincipalId>,
    /// Members the record lists that could not be provisioned.
    pub members_unresolved: Vec<PrincipalId>,
}

impl ReconcileResult {
    /// Whether the server copy is known to match the record.
    pub fn remote_converged(&self) -> bool {
        !matches!(self.remote, RemoteWrite::PermissionDenied { .. })
    }
}

pub struct ChannelSynchronizer {
    provisioner: Arc<Provisioner>,
    timeout: Duration,
    /// Channels whose cache was patched but whose remote write failed.
    pending_remote: Mutex<HashSet<ChannelKey>>,
}

impl ChannelSynchronizer {
    pub fn new(provisioner: Arc<Provisioner>, timeout: Duration) -> Self {
        Self {
            provisioner,
            timeout,
            pending_remote: Mutex::new(HashSet::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<ChannelKey>> {
        self.pending_remote
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a remote write for `key` is still owed.
    pub fn is_remote_pending(&self, key: &ChannelKey) -> bool {
        self.pending().contains(key)
    }

    /// Reconcile `channel` against `record`.
    ///
    /// Idempotent: a second call with the same record reports
    /// `changed == false` and issues no write, unless the previous remote
    /// write failed, in which case it is retried.  Errors other than a
    /// permission rejection are returned as [`ClientError::Sync`], with
    /// `local_applied` telling whether the cache had already converged.
    pub async fn reconcile(
        &self,
        backend: &dyn MessagingBackend,
        channel: &dyn ChannelHandle,
        record: &ChannelRecord,
    ) -> Result<ReconcileResult> {
        let key = channel.key().clone();

        if !channel.is_watching() {
            bounded(self.timeout, channel.watch())
                .await
                .map_err(|source| sync_error(&key, false, source))?;
        }

        let desired = record.desired_attributes();
        let changed = channel.cached_attributes() != desired;
        let remote = if changed || self.is_remote_pending(&key) {
            if changed {
                Self::apply_local(channel, &desired);
            } else {
                debug!(channel = %key, "Retrying pending remote update");
            }
            match self.push_remote(channel, &desired).await {
                Ok(remote) => {
                    self.pending().remove(&key);
                    remote
                }
                Err(source) => {
                    self.pending().insert(key.clone());
                    return Err(sync_error(&key, true, source));
                }
            }
        } else {
            debug!(channel = %key, "Channel attributes already match record");
            RemoteWrite::Skipped
        };

        let (members_added, members_unresolved) = self
            .grow_membership(backend, channel, record)
            .await?;

        Ok(ReconcileResult {
            channel: key,
            changed,
            remote,
            members_added,
            members_unresolved,
        })
    }

    /// Phase 1: patch the local cache.  Infallible and never touches the
    /// network.
    pub fn apply_local(channel: &dyn ChannelHandle, desired: &ChannelAttributes) {
        channel.patch_local(desired);
        debug!(channel = %channel.key(), name = %desired.name, "Patched local channel cache");
    }

    /// Phase 2: write `desired` server-side.  A permission rejection is
    /// folded into the returned [`RemoteWrite`].
    pub async fn push_remote(
        &self,
        channel: &dyn ChannelHandle,
        desired: &ChannelAttributes,
    ) -> std::result::Result<RemoteWrite, BackendError> {
        match bounded(self.timeout, channel.update(desired)).await {
            Ok(()) => {
                debug!(channel = %channel.key(), "Remote channel update applied");
                Ok(RemoteWrite::Applied)
            }
            Err(BackendError::PermissionDenied(reason)) => {
                info!(
                    channel = %channel.key(),
                    reason = %reason,
                    "Remote update not permitted, local cache updated only"
                );
                Ok(RemoteWrite::PermissionDenied { reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Add every record member missing from the live membership.  Existing
    /// members the record does not list are left alone.
    async fn grow_membership(
        &self,
        backend: &dyn MessagingBackend,
        channel: &dyn ChannelHandle,
        record: &ChannelRecord,
    ) -> Result<(Vec<PrincipalId>, Vec<PrincipalId>)> {
        let key = channel.key();
        let live = channel.members();
        let missing: Vec<&PrincipalId> = record
            .member_ids
            .iter()
            .filter(|id| !live.contains_key(*id))
            .collect();
        if missing.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut to_add = Vec::with_capacity(missing.len());
        let mut unresolved = Vec::new();
        for id in missing {
            match self.provisioner.ensure_principal(backend, id).await {
                Ok(()) => to_add.push(id.clone()),
                Err(ClientError::NotFound(what)) => {
                    warn!(channel = %key, principal = %id, %what, "Skipping member with no metadata record");
                    unresolved.push(id.clone());
                }
                Err(ClientError::Backend(source)) => return Err(sync_error(key, true, source)),
                Err(e) => return Err(e),
            }
        }
        if to_add.is_empty() {
            return Ok((to_add, unresolved));
        }

        match bounded(self.timeout, channel.add_members(&to_add)).await {
            Ok(()) => {
                info!(channel = %key, added = to_add.len(), "Added missing channel members");
                Ok((to_add, unresolved))
            }
            Err(BackendError::PermissionDenied(reason)) => {
                info!(channel = %key, reason = %reason, "Not permitted to add members");
                Ok((Vec::new(), unresolved))
            }
            Err(source) => Err(sync_error(key, true, source)),
        }
    }
}

fn sync_error(key: &ChannelKey, local_applied: bool, source: BackendError) -> ClientError {
    ClientError::Sync {
        channel: key.clone(),
        local_applied,
        source,
    }
}
