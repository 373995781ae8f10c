//! On-demand repair entry points for UI recovery paths and support tooling.
//!
//! Success is judged by local-cache convergence: a channel whose handle now
//! shows the record's attributes counts as fixed even when the server-side
//! write failed, because the cache is what readers render.

use serde::Serialize;
use tracing::{info, warn};

use tutorlink_shared::{ChannelClass, ChannelKey, PrincipalId};

use crate::chat::ChatCore;
use crate::error::{ClientError, Result};
use crate::refresh::RefreshReport;
use crate::session::bounded_lookup;
use crate::sync::RemoteWrite;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixOutcome {
    pub channel: ChannelKey,
    pub converged: bool,
    pub changed: bool,
    /// `None` when the remote write itself failed; see `remote_error`.
    pub remote: Option<RemoteWrite>,
    pub remote_error: Option<String>,
}

impl ChatCore {
    /// Resolve the record for one channel and reconcile it.
    pub async fn fix_one_channel(&self, channel_id: &str, class: ChannelClass) -> Result<FixOutcome> {
        let key = ChannelKey::new(class, channel_id);
        let record = bounded_lookup(self.session.network_timeout(), self.store.channel_record(&key)).await?;

        let result = self
            .with_connection(|backend| async move {
                let handle = backend.channel(&record.key);
                self.sync
                    .reconcile(backend.as_ref(), handle.as_ref(), &record)
                    .await
            })
            .await;

        let outcome = match result {
            Ok(r) => FixOutcome {
                channel: r.channel,
                converged: true,
                changed: r.changed,
                remote: Some(r.remote),
                remote_error: None,
            },
            Err(ClientError::Sync {
                channel,
                local_applied: true,
                source,
            }) => {
                warn!(channel = %channel, error = %source, "Channel fixed locally, remote write failed");
                FixOutcome {
                    channel,
                    converged: true,
                    changed: true,
                    remote: None,
                    remote_error: Some(source.to_string()),
                }
            }
            Err(e) => return Err(e),
        };

        info!(channel = %outcome.channel, changed = outcome.changed, "Channel fix finished");
        Ok(outcome)
    }

    /// Refresh every channel `principal` belongs to.
    pub async fn fix_all_channels_for_principal(&self, principal: &PrincipalId) -> Result<RefreshReport> {
        self.refresh_all(principal).await
    }
}

#[cfg(test)]
mod tests {
    use tutorlink_net::{ChannelHandle, MemberRole, MessagingBackend};
    use tutorlink_shared::BackendError;

    use super::*;
    use crate::test_support::{attrs, record, Harness};

    #[tokio::test]
    async fn test_fix_one_channel() {
        let h = Harness::new();
        h.seed_known_user("u1");
        let rec = record(ChannelClass::Group, "g1", "Physics", &["u1"]);
        h.seed_record(&rec);
        h.seed_channel(&rec.key, "old", &[("u1", MemberRole::Member)]);
        h.login("u1").await;

        let outcome = h.core.fix_one_channel("g1", ChannelClass::Group).await.unwrap();
        assert!(outcome.converged);
        assert!(outcome.changed);
        assert_eq!(outcome.remote, Some(RemoteWrite::Applied));

        let again = h.core.fix_one_channel("g1", ChannelClass::Group).await.unwrap();
        assert!(again.converged);
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn test_fix_reports_local_convergence_on_remote_failure() {
        let h = Harness::new();
        h.seed_known_user("u1");
        let rec = record(ChannelClass::Group, "g1", "Physics", &["u1"]);
        h.seed_record(&rec);
        h.seed_channel(&rec.key, "old", &[("u1", MemberRole::Member)]);
        h.backend
            .fail_updates(rec.key.clone(), BackendError::Network("reset".into()));
        h.login("u1").await;

        let outcome = h.core.fix_one_channel("g1", ChannelClass::Group).await.unwrap();
        assert!(outcome.converged);
        assert!(outcome.remote.is_none());
        assert!(outcome.remote_error.unwrap().contains("reset"));
        assert_eq!(h.backend.channel(&rec.key).cached_attributes(), attrs("Physics"));
    }

    #[tokio::test]
    async fn test_fix_retries_failed_remote_write() {
        let h = Harness::new();
        h.seed_known_user("u1");
        let rec = record(ChannelClass::Group, "g1", "Physics", &["u1"]);
        h.seed_record(&rec);
        h.seed_channel(&rec.key, "old", &[("u1", MemberRole::Member)]);
        h.backend
            .fail_updates(rec.key.clone(), BackendError::Network("reset".into()));
        h.login("u1").await;

        let failed = h.core.fix_one_channel("g1", ChannelClass::Group).await.unwrap();
        assert!(failed.remote_error.is_some());
        assert!(h.core.synchronizer().is_remote_pending(&rec.key));

        h.backend.clear_update_failure(&rec.key);
        let retried = h.core.fix_one_channel("g1", ChannelClass::Group).await.unwrap();
        assert!(!retried.changed);
        assert_eq!(retried.remote, Some(RemoteWrite::Applied));
        assert_eq!(h.backend.server_attributes(&rec.key).unwrap(), attrs("Physics"));
        assert!(!h.core.synchronizer().is_remote_pending(&rec.key));

        let settled = h.core.fix_one_channel("g1", ChannelClass::Group).await.unwrap();
        assert_eq!(settled.remote, Some(RemoteWrite::Skipped));
    }

    #[tokio::test]
    async fn test_fix_restricted_channel_as_member() {
        let h = Harness::new();
        h.seed_known_user("u1");
        let rec = record(ChannelClass::Class, "c1", "Algebra I", &["u1"]);
        h.seed_record(&rec);
        h.seed_channel(&rec.key, "Algebra", &[("u1", MemberRole::Member)]);
        h.login("u1").await;

        let outcome = h.core.fix_one_channel("c1", ChannelClass::Class).await.unwrap();
        assert!(outcome.converged);
        assert!(matches!(outcome.remote, Some(RemoteWrite::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn test_fix_unknown_channel() {
        let h = Harness::new();
        h.seed_known_user("u1");
        h.login("u1").await;

        let err = h
            .core
            .fix_one_channel("nope", ChannelClass::Class)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fix_all_channels() {
        let h = Harness::new();
        h.seed_known_user("u1");
        let a = record(ChannelClass::Group, "a", "A", &["u1"]);
        let b = record(ChannelClass::PremiumGroup, "b", "B", &["u1"]);
        for rec in [&a, &b] {
            h.seed_record(rec);
            h.seed_channel(&rec.key, "stale", &[("u1", MemberRole::Member)]);
        }

        let report = h
            .core
            .fix_all_channels_for_principal(&PrincipalId::new("u1"))
            .await
            .unwrap();
        assert_eq!(report.converged().count(), 2);
        assert_eq!(report.failed().count(), 0);
        assert_eq!(report.changed_count(), 2);
    }
}
