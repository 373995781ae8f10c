// Shared fixtures for the client test suites.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use tutorlink_net::{CredentialProvider, MemberRole, MemoryBackend};
use tutorlink_shared::{
    token, AuthError, ChannelAttributes, ChannelClass, ChannelKey, ChannelRecord, IssuedToken,
    Principal, PrincipalClass, PrincipalId,
};
use tutorlink_store::{Database, MetadataStore, PrincipalRecord};

use crate::config::ClientConfig;
use crate::ChatCore;

pub const SECRET: [u8; 32] = [42u8; 32];

pub fn test_config() -> ClientConfig {
    ClientConfig {
        network_timeout: Duration::from_millis(500),
        reconnect_cooldown: Duration::from_millis(300),
        ..ClientConfig::default()
    }
}

/// Mints tokens with [`SECRET`] and records every call.
pub struct CountingCredentials {
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    failure: Mutex<Option<AuthError>>,
    expired: Mutex<bool>,
    issued: Mutex<Vec<String>>,
}

impl CountingCredentials {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            expired: Mutex::new(false),
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fail_with(&self, error: Option<AuthError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn issue_expired(&self, expired: bool) {
        *self.expired.lock().unwrap() = expired;
    }

    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialProvider for CountingCredentials {
    async fn session_token(&self, principal: &PrincipalId) -> Result<IssuedToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        let issued_at = if *self.expired.lock().unwrap() {
            Utc::now() - chrono::Duration::hours(2)
        } else {
            Utc::now()
        };
        let issued = token::mint_at(&SECRET, principal, issued_at, chrono::Duration::hours(1));
        self.issued.lock().unwrap().push(issued.token.clone());
        Ok(issued)
    }
}

pub fn attrs(name: &str) -> ChannelAttributes {
    ChannelAttributes {
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn record(class: ChannelClass, id: &str, name: &str, members: &[&str]) -> ChannelRecord {
    ChannelRecord {
        key: ChannelKey::new(class, id),
        display_name: name.to_string(),
        description: String::new(),
        avatar_url: None,
        member_ids: members.iter().map(|m| PrincipalId::new(*m)).collect::<BTreeSet<_>>(),
        owner_id: None,
    }
}

pub fn backend_user(id: &str) -> Principal {
    Principal {
        id: PrincipalId::new(id),
        display_name: format!("User {id}"),
        avatar_url: None,
        class: PrincipalClass::Learner,
    }
}

/// A [`ChatCore`] wired to an in-memory backend and an in-memory metadata
/// database.
pub struct Harness {
    pub backend: MemoryBackend,
    pub credentials: Arc<CountingCredentials>,
    pub db: Arc<Database>,
    pub core: ChatCore,
}

impl Harness {
    pub fn new() -> Self {
        let backend = MemoryBackend::with_token_secret(SECRET);
        let credentials = Arc::new(CountingCredentials::new());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store: Arc<dyn MetadataStore> = db.clone();
        let core = ChatCore::new(
            Arc::new(backend.clone()),
            credentials.clone(),
            store,
            &test_config(),
        );
        Self {
            backend,
            credentials,
            db,
            core,
        }
    }

    /// Put a principal in the metadata store only.
    pub fn seed_principal(&self, collection: &str, id: &str, name: &str) {
        self.db
            .upsert_principal(
                collection,
                &PrincipalRecord {
                    id: PrincipalId::new(id),
                    display_name: name.to_string(),
                    avatar_url: None,
                    updated_at: Utc::now(),
                },
            )
            .unwrap();
    }

    /// Put a principal in both the metadata store and the backend directory.
    pub fn seed_known_user(&self, id: &str) {
        self.seed_principal(tutorlink_shared::constants::LEARNER_COLLECTION, id, &format!("User {id}"));
        self.backend.seed_user(backend_user(id));
    }

    pub fn seed_record(&self, record: &ChannelRecord) {
        self.db.upsert_channel_record(record).unwrap();
    }

    /// Create `key` on the backend with the given server attributes and roles.
    pub fn seed_channel(&self, key: &ChannelKey, name: &str, members: &[(&str, MemberRole)]) {
        let members: Vec<(PrincipalId, MemberRole)> = members
            .iter()
            .map(|(id, role)| (PrincipalId::new(*id), *role))
            .collect();
        self.backend.seed_channel(key.clone(), attrs(name), &members);
    }

    pub async fn login(&self, id: &str) {
        self.core.session().login(PrincipalId::new(id)).await.unwrap();
    }
}
