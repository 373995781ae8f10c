//! Read-only view of the metadata store used by the reconciliation core.

use async_trait::async_trait;

use tutorlink_shared::{ChannelKey, ChannelRecord, PrincipalId};

use crate::database::Database;
use crate::error::Result;
use crate::models::PrincipalRecord;

/// Record lookups against the authoritative metadata store.
///
/// Both lookups fail with [`StoreError::NotFound`] when the record is
/// absent.  Implementations never mutate the store on behalf of the core.
///
/// [`StoreError::NotFound`]: crate::StoreError::NotFound
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// The record backing a channel, looked up in the collection its
    /// channel class maps to.
    async fn channel_record(&self, key: &ChannelKey) -> Result<ChannelRecord>;

    /// A principal's display record in one principal collection.
    async fn principal_record(&self, collection: &str, id: &PrincipalId)
        -> Result<PrincipalRecord>;
}

#[async_trait]
impl MetadataStore for Database {
    async fn channel_record(&self, key: &ChannelKey) -> Result<ChannelRecord> {
        self.get_channel_record(key)
    }

    async fn principal_record(
        &self,
        collection: &str,
        id: &PrincipalId,
    ) -> Result<PrincipalRecord> {
        self.get_principal(collection, id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::Utc;
    use tutorlink_shared::ChannelClass;

    use super::*;

    #[tokio::test]
    async fn test_database_as_metadata_store() {
        let db = Database::open_in_memory().unwrap();
        let key = ChannelKey::new(ChannelClass::Group, "g1");
        db.upsert_channel_record(&ChannelRecord {
            key: key.clone(),
            display_name: "Chemistry".into(),
            description: String::new(),
            avatar_url: None,
            member_ids: BTreeSet::new(),
            owner_id: None,
        })
        .unwrap();
        db.upsert_principal(
            "instructors",
            &PrincipalRecord {
                id: PrincipalId::new("t1"),
                display_name: "Marie".into(),
                avatar_url: None,
                updated_at: Utc::now(),
            },
        )
        .unwrap();

        let store: Arc<dyn MetadataStore> = Arc::new(db);
        assert_eq!(store.channel_record(&key).await.unwrap().display_name, "Chemistry");
        assert_eq!(
            store
                .principal_record("instructors", &PrincipalId::new("t1"))
                .await
                .unwrap()
                .display_name,
            "Marie"
        );

        let missing = store
            .channel_record(&ChannelKey::new(ChannelClass::Group, "g2"))
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "Record not found: groups/g2");
    }
}
