//! The reconciliation core as seen by callers.
//!
//! [`ChatCore`] wires the session manager, provisioning, the synchronizer
//! and the bulk refresher together and exposes the operations UI code and
//! support tooling call.

use std::sync::Arc;

use tracing::{info, warn};

use tutorlink_net::{ChannelHandle, ChannelSpec, CredentialProvider, HttpCredentialProvider, MessagingBackend};
use tutorlink_shared::{BackendError, ChannelKey, ChannelRecord, PrincipalId};
use tutorlink_store::{Database, MetadataStore};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::provisioning::Provisioner;
use crate::refresh::{BulkRefresher, RefreshReport};
use crate::session::{bounded, bounded_lookup, SessionManager};
use crate::sync::{ChannelSynchronizer, ReconcileResult};

pub struct ChatCore {
    pub(crate) session: Arc<SessionManager>,
    pub(crate) store: Arc<dyn MetadataStore>,
    pub(crate) provisioner: Arc<Provisioner>,
    pub(crate) sync: Arc<ChannelSynchronizer>,
    pub(crate) refresher: BulkRefresher,
}

impl ChatCore {
    pub fn new(
        backend: Arc<dyn MessagingBackend>,
        credentials: Arc<dyn CredentialProvider>,
        store: Arc<dyn MetadataStore>,
        config: &ClientConfig,
    ) -> Self {
        let session = Arc::new(SessionManager::new(backend, credentials, config));
        let provisioner = Arc::new(Provisioner::new(store.clone(), config.network_timeout));
        let sync = Arc::new(ChannelSynchronizer::new(
            provisioner.clone(),
            config.network_timeout,
        ));
        let refresher = BulkRefresher::new(session.clone(), store.clone(), sync.clone());

        Self {
            session,
            store,
            provisioner,
            sync,
            refresher,
        }
    }

    /// Build a core that fetches tokens over HTTP and reads metadata from
    /// the local SQLite mirror named by `config`.
    pub fn from_config(config: &ClientConfig, backend: Arc<dyn MessagingBackend>) -> Result<Self> {
        let credentials = HttpCredentialProvider::new(
            config.token_endpoint.clone(),
            config.token_api_key.clone(),
            config.network_timeout,
        )?;
        let db = match config.metadata_db_path {
            Some(ref path) => Database::open_at(path)?,
            None => Database::open_default()?,
        };
        info!(endpoint = %credentials.endpoint(), "Chat core configured");

        Ok(Self::new(backend, Arc::new(credentials), Arc::new(db), config))
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn synchronizer(&self) -> &ChannelSynchronizer {
        &self.sync
    }

    /// See [`SessionManager::with_connection`].
    pub async fn with_connection<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn MessagingBackend>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.session.with_connection(op).await
    }

    pub async fn ensure_principal(&self, id: &PrincipalId) -> Result<()> {
        self.with_connection(|backend| async move {
            self.provisioner.ensure_principal(backend.as_ref(), id).await
        })
        .await
    }

    pub async fn reconcile(
        &self,
        channel: &dyn ChannelHandle,
        record: &ChannelRecord,
    ) -> Result<ReconcileResult> {
        self.with_connection(|backend| async move {
            self.sync.reconcile(backend.as_ref(), channel, record).await
        })
        .await
    }

    pub async fn refresh_all(&self, principal: &PrincipalId) -> Result<RefreshReport> {
        self.refresher.refresh_all(principal).await
    }

    /// Reconcile a channel as it is opened and return its live handle.
    ///
    /// A remote write that fails after the local cache was patched is
    /// logged and tolerated, since readers of the handle already see the
    /// record's attributes.
    pub async fn open_channel(&self, key: &ChannelKey) -> Result<Arc<dyn ChannelHandle>> {
        let record = bounded_lookup(self.session.network_timeout(), self.store.channel_record(key)).await?;

        self.with_connection(|backend| async move {
            let handle = backend.channel(key);
            match self.sync.reconcile(backend.as_ref(), handle.as_ref(), &record).await {
                Ok(_) => {}
                Err(ClientError::Sync {
                    local_applied: true,
                    source,
                    ..
                }) if source != BackendError::NotConnected => {
                    warn!(channel = %key, error = %source, "Opened channel with local-only reconcile");
                }
                Err(e) => return Err(e),
            }
            Ok(handle)
        })
        .await
    }

    /// Create the channel described by `record`, provisioning every
    /// referenced principal first.  The owner is `record.owner_id`, or the
    /// connected principal when the record names none.  If the channel
    /// already exists it is reconciled instead.
    pub async fn create_channel(&self, record: &ChannelRecord) -> Result<Arc<dyn ChannelHandle>> {
        let limit = self.session.network_timeout();

        self.with_connection(|backend| async move {
            let creator = match record.owner_id {
                Some(ref owner) => owner.clone(),
                None => self
                    .session
                    .state()
                    .connected_principal
                    .ok_or(ClientError::NoPrincipal)?,
            };

            let mut referenced: Vec<PrincipalId> = record.member_ids.iter().cloned().collect();
            if !record.member_ids.contains(&creator) {
                referenced.push(creator.clone());
            }
            self.provisioner
                .ensure_principals(backend.as_ref(), &referenced)
                .await?;

            let existing = backend.channel(&record.key);
            match bounded(limit, existing.watch()).await {
                Ok(()) => {
                    info!(channel = %record.key, "Channel already exists, reconciling");
                    self.sync
                        .reconcile(backend.as_ref(), existing.as_ref(), record)
                        .await?;
                    return Ok(existing);
                }
                Err(BackendError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }

            let spec = ChannelSpec {
                key: record.key.clone(),
                attributes: record.desired_attributes(),
                members: record.member_ids.iter().cloned().collect(),
                created_by: creator,
            };
            let handle = bounded(limit, backend.create_channel(&spec)).await?;
            info!(channel = %record.key, members = spec.members.len(), "Channel created");
            Ok(handle)
        })
        .await
    }

    /// Add `ids` to a channel, provisioning each principal first.
    pub async fn add_members(&self, key: &ChannelKey, ids: &[PrincipalId]) -> Result<()> {
        let limit = self.session.network_timeout();

        self.with_connection(|backend| async move {
            self.provisioner
                .ensure_principals(backend.as_ref(), ids)
                .await?;

            let handle = backend.channel(key);
            if !handle.is_watching() {
                bounded(limit, handle.watch()).await?;
            }
            bounded(limit, handle.add_members(ids)).await?;
            info!(channel = %key, added = ids.len(), "Members added");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use tutorlink_net::MemberRole;
    use tutorlink_shared::constants::{INSTRUCTOR_COLLECTION, LEARNER_COLLECTION};
    use tutorlink_shared::ChannelClass;

    use super::*;
    use crate::test_support::{attrs, record, Harness};

    #[tokio::test]
    async fn test_open_channel_reconciles() {
        let h = Harness::new();
        h.seed_known_user("u1");
        let rec = record(ChannelClass::PremiumGroup, "p1", "Premium Physics", &["u1"]);
        h.seed_record(&rec);
        h.seed_channel(&rec.key, "old", &[("u1", MemberRole::Member)]);
        h.login("u1").await;

        let handle = h.core.open_channel(&rec.key).await.unwrap();
        assert_eq!(handle.cached_attributes(), attrs("Premium Physics"));
    }

    #[tokio::test]
    async fn test_open_channel_tolerates_remote_failure() {
        let h = Harness::new();
        h.seed_known_user("u1");
        let rec = record(ChannelClass::Group, "g1", "Physics", &["u1"]);
        h.seed_record(&rec);
        h.seed_channel(&rec.key, "old", &[("u1", MemberRole::Member)]);
        h.backend
            .fail_updates(rec.key.clone(), BackendError::Network("reset".into()));
        h.login("u1").await;

        let handle = h.core.open_channel(&rec.key).await.unwrap();
        assert_eq!(handle.cached_attributes(), attrs("Physics"));
    }

    #[tokio::test]
    async fn test_open_channel_without_record() {
        let h = Harness::new();
        h.seed_known_user("u1");
        h.login("u1").await;

        let err = h
            .core
            .open_channel(&ChannelKey::new(ChannelClass::Group, "missing"))
            .await
            .err()
            .expect("open_channel should fail without a record");
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_channel_provisions_everyone() {
        let h = Harness::new();
        h.seed_principal(INSTRUCTOR_COLLECTION, "t1", "Dr. Ada");
        h.seed_principal(LEARNER_COLLECTION, "l1", "Lin");
        h.login("t1").await;

        let rec = record(ChannelClass::Class, "c1", "Algebra", &["l1"]);
        let handle = h.core.create_channel(&rec).await.unwrap();

        assert_eq!(handle.cached_attributes(), attrs("Algebra"));
        assert!(h.backend.has_user(&PrincipalId::new("t1")));
        assert!(h.backend.has_user(&PrincipalId::new("l1")));
        let members = h.backend.server_members(&rec.key).unwrap();
        assert_eq!(members.get(&PrincipalId::new("t1")), Some(&MemberRole::Owner));
        assert_eq!(members.get(&PrincipalId::new("l1")), Some(&MemberRole::Member));
    }

    #[tokio::test]
    async fn test_create_channel_twice_reconciles() {
        let h = Harness::new();
        h.seed_principal(INSTRUCTOR_COLLECTION, "t1", "Dr. Ada");
        h.login("t1").await;

        let mut rec = record(ChannelClass::Group, "g1", "Study", &["t1"]);
        h.core.create_channel(&rec).await.unwrap();

        rec.display_name = "Study group".into();
        h.core.create_channel(&rec).await.unwrap();
        assert_eq!(h.backend.server_attributes(&rec.key).unwrap(), attrs("Study group"));
    }

    #[tokio::test]
    async fn test_create_channel_with_unknown_member() {
        let h = Harness::new();
        h.seed_principal(INSTRUCTOR_COLLECTION, "t1", "Dr. Ada");
        h.login("t1").await;

        let rec = record(ChannelClass::Group, "g1", "Study", &["ghost"]);
        let Err(err) = h.core.create_channel(&rec).await else {
            panic!("create_channel should fail for an unknown member");
        };
        assert!(matches!(err, ClientError::NotFound(_)));
        assert!(h.backend.server_attributes(&rec.key).is_none());
    }

    #[tokio::test]
    async fn test_add_members_provisions_first() {
        let h = Harness::new();
        h.seed_known_user("u1");
        h.seed_principal(LEARNER_COLLECTION, "u2", "Ulla");
        let key = ChannelKey::new(ChannelClass::Group, "g1");
        h.seed_channel(&key, "Physics", &[("u1", MemberRole::Owner)]);
        h.login("u1").await;

        h.core
            .add_members(&key, &[PrincipalId::new("u2")])
            .await
            .unwrap();
        assert!(h
            .backend
            .server_members(&key)
            .unwrap()
            .contains_key(&PrincipalId::new("u2")));
    }

    #[tokio::test]
    async fn test_add_members_on_restricted_channel_denied() {
        let h = Harness::new();
        h.seed_known_user("u1");
        h.seed_known_user("u2");
        let key = ChannelKey::new(ChannelClass::PremiumGroup, "p1");
        h.seed_channel(&key, "Premium", &[("u1", MemberRole::Member)]);
        h.login("u1").await;

        let err = h
            .core
            .add_members(&key, &[PrincipalId::new("u2")])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Backend(BackendError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_ensure_principal_reconnects_lazily() {
        let h = Harness::new();
        h.seed_principal(LEARNER_COLLECTION, "u1", "Uma");
        h.login("u1").await;
        h.backend.drop_session();
        h.core.session().mark_session_lost("test").await;

        h.core.ensure_principal(&PrincipalId::new("u1")).await.unwrap();
        assert!(h.backend.has_user(&PrincipalId::new("u1")));
        assert_eq!(h.credentials.calls(), 2);
    }

    #[tokio::test]
    async fn test_from_config_opens_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            metadata_db_path: Some(dir.path().join("meta.db")),
            ..crate::test_support::test_config()
        };

        let core = ChatCore::from_config(&config, Arc::new(tutorlink_net::MemoryBackend::new())).unwrap();
        assert!(dir.path().join("meta.db").exists());

        let err = core.ensure_principal(&PrincipalId::new("u1")).await.unwrap_err();
        assert!(matches!(err, ClientError::NoPrincipal));
    }
}
