//! Principal provisioning.
//!
//! Before any channel operation names a principal, that principal must
//! exist in the messaging backend's user directory.  Missing principals are
//! created from their metadata-store record.  The record is looked up in an
//! ordered list of collections; the first collection that holds it decides
//! the principal's class.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use tutorlink_net::MessagingBackend;
use tutorlink_shared::constants::{GUEST_COLLECTION, INSTRUCTOR_COLLECTION, LEARNER_COLLECTION};
use tutorlink_shared::{Principal, PrincipalClass, PrincipalId};
use tutorlink_store::MetadataStore;

use crate::error::{ClientError, Result};
use crate::session::{bounded, bounded_lookup};

/// One collection to search, and the class a hit there implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionLookup {
    pub collection: &'static str,
    pub class: PrincipalClass,
}

/// Instructors first, then learners, then guests.
pub const DEFAULT_LOOKUP_ORDER: [CollectionLookup; 3] = [
    CollectionLookup {
        collection: INSTRUCTOR_COLLECTION,
        class: PrincipalClass::Instructor,
    },
    CollectionLookup {
        collection: LEARNER_COLLECTION,
        class: PrincipalClass::Learner,
    },
    CollectionLookup {
        collection: GUEST_COLLECTION,
        class: PrincipalClass::Guest,
    },
];

pub struct Provisioner {
    store: Arc<dyn MetadataStore>,
    lookups: Vec<CollectionLookup>,
    timeout: Duration,
}

impl Provisioner {
    pub fn new(store: Arc<dyn MetadataStore>, timeout: Duration) -> Self {
        Self::with_lookups(store, DEFAULT_LOOKUP_ORDER.to_vec(), timeout)
    }

    pub fn with_lookups(
        store: Arc<dyn MetadataStore>,
        lookups: Vec<CollectionLookup>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            lookups,
            timeout,
        }
    }

    /// Make sure `id` exists in the backend's user directory.
    ///
    /// Safe to call repeatedly: an existing user is left untouched.  Fails
    /// with [`ClientError::NotFound`] when no collection holds the principal.
    pub async fn ensure_principal(
        &self,
        backend: &dyn MessagingBackend,
        id: &PrincipalId,
    ) -> Result<()> {
        let existing = bounded(self.timeout, backend.query_users(id)).await?;
        if !existing.is_empty() {
            debug!(principal = %id, "Principal already provisioned");
            return Ok(());
        }

        let principal = self.resolve(id).await?;
        bounded(self.timeout, backend.upsert_user(&principal)).await?;
        info!(
            principal = %id,
            class = principal.class.as_str(),
            "Provisioned principal in messaging backend"
        );
        Ok(())
    }

    /// Provision every id in order, stopping at the first failure.
    pub async fn ensure_principals(
        &self,
        backend: &dyn MessagingBackend,
        ids: &[PrincipalId],
    ) -> Result<()> {
        for id in ids {
            self.ensure_principal(backend, id).await?;
        }
        Ok(())
    }

    /// Build the backend profile for `id` from the first collection that
    /// holds it.
    pub async fn resolve(&self, id: &PrincipalId) -> Result<Principal> {
        for lookup in &self.lookups {
            let found = bounded_lookup(
                self.timeout,
                self.store.principal_record(lookup.collection, id),
            )
            .await;
            match found {
                Ok(record) => {
                    return Ok(Principal {
                        id: record.id,
                        display_name: record.display_name,
                        avatar_url: record.avatar_url,
                        class: lookup.class,
                    })
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ClientError::NotFound(format!("principal {id}")))
    }
}

#[cfg(test)]
mod tests {
    use tutorlink_net::MemoryBackend;
    use tutorlink_shared::BackendError;
    use tutorlink_store::Database;

    use super::*;
    use crate::test_support::backend_user;

    fn setup() -> (Arc<Database>, Provisioner) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store: Arc<dyn MetadataStore> = db.clone();
        (db, Provisioner::new(store, Duration::from_secs(1)))
    }

    fn seed(db: &Database, collection: &str, id: &str, name: &str) {
        db.upsert_principal(
            collection,
            &tutorlink_store::PrincipalRecord {
                id: PrincipalId::new(id),
                display_name: name.into(),
                avatar_url: Some(format!("https://img/{id}")),
                updated_at: chrono::Utc::now(),
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_instructor_collection_wins() {
        let (db, provisioner) = setup();
        seed(&db, GUEST_COLLECTION, "p1", "Guest name");
        seed(&db, LEARNER_COLLECTION, "p1", "Learner name");
        seed(&db, INSTRUCTOR_COLLECTION, "p1", "Dr. Ada");

        let principal = provisioner.resolve(&PrincipalId::new("p1")).await.unwrap();
        assert_eq!(principal.class, PrincipalClass::Instructor);
        assert_eq!(principal.display_name, "Dr. Ada");
        assert_eq!(principal.avatar_url.as_deref(), Some("https://img/p1"));
    }

    #[tokio::test]
    async fn test_falls_through_to_guests() {
        let (db, provisioner) = setup();
        seed(&db, GUEST_COLLECTION, "g1", "Visitor");

        let principal = provisioner.resolve(&PrincipalId::new("g1")).await.unwrap();
        assert_eq!(principal.class, PrincipalClass::Guest);
    }

    #[tokio::test]
    async fn test_unknown_principal_not_found() {
        let (_db, provisioner) = setup();
        let backend = MemoryBackend::new();

        let err = provisioner
            .ensure_principal(&backend, &PrincipalId::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
        assert!(!backend.has_user(&PrincipalId::new("ghost")));
    }

    #[tokio::test]
    async fn test_provisioning_creates_then_is_idempotent() {
        let (db, provisioner) = setup();
        seed(&db, LEARNER_COLLECTION, "l1", "Lin");
        let backend = MemoryBackend::new();
        let id = PrincipalId::new("l1");

        provisioner.ensure_principal(&backend, &id).await.unwrap();
        assert!(backend.has_user(&id));

        // A second call must not overwrite what the backend holds.
        backend.seed_user(Principal {
            display_name: "Lin (edited)".into(),
            ..backend_user("l1")
        });
        provisioner.ensure_principal(&backend, &id).await.unwrap();
        let users = backend.query_users(&id).await.unwrap();
        assert_eq!(users[0].display_name, "Lin (edited)");
    }

    #[tokio::test]
    async fn test_backend_rejection_propagates() {
        let (db, provisioner) = setup();
        seed(&db, LEARNER_COLLECTION, "blank", "   ");
        let backend = MemoryBackend::new();

        let err = provisioner
            .ensure_principal(&backend, &PrincipalId::new("blank"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Backend(BackendError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_custom_lookup_order() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db, INSTRUCTOR_COLLECTION, "p1", "Dr. Ada");
        seed(&db, LEARNER_COLLECTION, "p1", "Ada");
        let store: Arc<dyn MetadataStore> = db.clone();
        let provisioner = Provisioner::with_lookups(
            store,
            vec![DEFAULT_LOOKUP_ORDER[1], DEFAULT_LOOKUP_ORDER[0]],
            Duration::from_secs(1),
        );

        let principal = provisioner.resolve(&PrincipalId::new("p1")).await.unwrap();
        assert_eq!(principal.class, PrincipalClass::Learner);
    }

    struct StalledStore;

    #[async_trait::async_trait]
    impl MetadataStore for StalledStore {
        async fn channel_record(
            &self,
            _: &tutorlink_shared::ChannelKey,
        ) -> tutorlink_store::Result<tutorlink_shared::ChannelRecord> {
            std::future::pending().await
        }

        async fn principal_record(
            &self,
            _: &str,
            _: &PrincipalId,
        ) -> tutorlink_store::Result<tutorlink_store::PrincipalRecord> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let provisioner = Provisioner::new(Arc::new(StalledStore), Duration::from_millis(50));
        let backend = MemoryBackend::new();

        let err = provisioner
            .ensure_principal(&backend, &PrincipalId::new("l1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Store(tutorlink_store::StoreError::Timeout(_))), "{err:?}");
        assert!(err.is_retryable());
    }
}
