//! In-process messaging backend.
//!
//! Keeps users, channels and the current session in memory and enforces the
//! same rules as the hosted backend:
//!
//! - every channel operation needs a connected session,
//! - restricted-tier channels only accept metadata writes (and member
//!   additions) from an owner or moderator,
//! - a principal must exist in the user directory before a channel can
//!   reference it,
//! - when configured with a token secret, `connect` rejects expired or
//!   forged tokens.
//!
//! Used by the test suites and for local development.  Fault injection
//! helpers (`fail_next_connects`, `fail_updates`, `set_connect_delay`) let
//! tests drive the failure branches.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use tutorlink_shared::constants::MAX_CHANNEL_NAME_LEN;
use tutorlink_shared::{
    token, BackendError, ChannelAttributes, ChannelKey, IssuedToken, PermissionTier, Principal,
    PrincipalId,
};

use crate::backend::{
    BackendResult, ChannelFilter, ChannelHandle, ChannelSpec, MemberRole, MessagingBackend,
};

// ---------------------------------------------------------------------------
// Server-side state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ServerChannel {
    attributes: ChannelAttributes,
    members: BTreeMap<PrincipalId, MemberRole>,
}

#[derive(Default)]
struct ServerState {
    users: HashMap<PrincipalId, Principal>,
    channels: BTreeMap<ChannelKey, ServerChannel>,
    session: Option<PrincipalId>,
    /// Handles given out during the current session.
    handles: HashMap<ChannelKey, Arc<MemoryChannel>>,
    failing_connects: usize,
    failing_updates: HashMap<ChannelKey, BackendError>,
}

struct Inner {
    state: Mutex<ServerState>,
    token_secret: Option<[u8; 32]>,
    connect_delay: Mutex<Duration>,
    connect_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An in-memory [`MessagingBackend`].  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// A backend that accepts any token.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A backend that verifies session tokens against `secret`.
    pub fn with_token_secret(secret: [u8; 32]) -> Self {
        Self::build(Some(secret))
    }

    fn build(token_secret: Option<[u8; 32]>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ServerState::default()),
                token_secret,
                connect_delay: Mutex::new(Duration::ZERO),
                connect_calls: AtomicUsize::new(0),
                update_calls: AtomicUsize::new(0),
            }),
        }
    }

    // -- Seeding and inspection ------------------------------------------

    /// Create a channel directly on the server, bypassing permission checks.
    pub fn seed_channel(
        &self,
        key: ChannelKey,
        attributes: ChannelAttributes,
        members: &[(PrincipalId, MemberRole)],
    ) {
        let mut state = self.inner.state();
        state.channels.insert(
            key,
            ServerChannel {
                attributes,
                members: members.iter().cloned().collect(),
            },
        );
    }

    pub fn seed_user(&self, principal: Principal) {
        self.inner
            .state()
            .users
            .insert(principal.id.clone(), principal);
    }

    pub fn has_user(&self, id: &PrincipalId) -> bool {
        self.inner.state().users.contains_key(id)
    }

    pub fn server_attributes(&self, key: &ChannelKey) -> Option<ChannelAttributes> {
        self.inner
            .state()
            .channels
            .get(key)
            .map(|c| c.attributes.clone())
    }

    pub fn server_members(&self, key: &ChannelKey) -> Option<BTreeMap<PrincipalId, MemberRole>> {
        self.inner
            .state()
            .channels
            .get(key)
            .map(|c| c.members.clone())
    }

    pub fn current_user(&self) -> Option<PrincipalId> {
        self.inner.state().session.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.inner.update_calls.load(Ordering::SeqCst)
    }

    // -- Fault injection ---------------------------------------------------

    /// Make the next `n` connect attempts fail with a network error.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.state().failing_connects = n;
    }

    /// Make every server-side update of `key` fail with `error`.
    pub fn fail_updates(&self, key: ChannelKey, error: BackendError) {
        self.inner.state().failing_updates.insert(key, error);
    }

    pub fn clear_update_failure(&self, key: &ChannelKey) {
        self.inner.state().failing_updates.remove(key);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self
            .inner
            .connect_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// Drop the session as if the server had closed it.
    pub fn drop_session(&self) {
        let mut state = self.inner.state();
        state.session = None;
        state.handles.clear();
    }

    fn handle_for(&self, state: &mut ServerState, key: &ChannelKey) -> Arc<MemoryChannel> {
        state
            .handles
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(MemoryChannel {
                    key: key.clone(),
                    backend: Arc::downgrade(&self.inner),
                    local: Mutex::new(LocalState::default()),
                })
            })
            .clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn session_of(state: &ServerState) -> BackendResult<PrincipalId> {
    state.session.clone().ok_or(BackendError::NotConnected)
}

#[async_trait]
impl MessagingBackend for MemoryBackend {
    async fn connect(&self, principal: &PrincipalId, issued: &IssuedToken) -> BackendResult<()> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .inner
            .connect_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(secret) = self.inner.token_secret {
            let claims = token::verify(&secret, &issued.token, Utc::now())
                .map_err(|e| BackendError::Unauthenticated(e.to_string()))?;
            if &claims.sub != principal {
                return Err(BackendError::Unauthenticated(format!(
                    "token subject {} does not match {principal}",
                    claims.sub
                )));
            }
        }

        let mut state = self.inner.state();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BackendError::Network("connection reset".into()));
        }
        if let Some(ref current) = state.session {
            return Err(BackendError::BadRequest(format!(
                "already connected as {current}"
            )));
        }

        state.session = Some(principal.clone());
        debug!(principal = %principal, "Memory backend session opened");
        Ok(())
    }

    async fn disconnect_current_user(&self) -> BackendResult<()> {
        let mut state = self.inner.state();
        state.session = None;
        state.handles.clear();
        Ok(())
    }

    async fn upsert_user(&self, principal: &Principal) -> BackendResult<()> {
        if principal.display_name.trim().is_empty() {
            return Err(BackendError::BadRequest("user name must not be empty".into()));
        }
        self.seed_user(principal.clone());
        Ok(())
    }

    async fn query_users(&self, id: &PrincipalId) -> BackendResult<Vec<Principal>> {
        Ok(self.inner.state().users.get(id).cloned().into_iter().collect())
    }

    fn channel(&self, key: &ChannelKey) -> Arc<dyn ChannelHandle> {
        let mut state = self.inner.state();
        self.handle_for(&mut state, key)
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> BackendResult<Arc<dyn ChannelHandle>> {
        let mut state = self.inner.state();
        session_of(&state)?;
        validate_attributes(&spec.attributes)?;

        if state.channels.contains_key(&spec.key) {
            return Err(BackendError::BadRequest(format!(
                "channel {} already exists",
                spec.key
            )));
        }
        for id in spec.members.iter().chain(std::iter::once(&spec.created_by)) {
            if !state.users.contains_key(id) {
                return Err(BackendError::NotFound(format!("user {id}")));
            }
        }

        let mut members: BTreeMap<PrincipalId, MemberRole> = spec
            .members
            .iter()
            .map(|id| (id.clone(), MemberRole::Member))
            .collect();
        members.insert(spec.created_by.clone(), MemberRole::Owner);

        let server = ServerChannel {
            attributes: spec.attributes.clone(),
            members,
        };
        state.channels.insert(spec.key.clone(), server.clone());

        let handle = self.handle_for(&mut state, &spec.key);
        handle.load(&server);
        debug!(channel = %spec.key, owner = %spec.created_by, "Channel created");
        Ok(handle as Arc<dyn ChannelHandle>)
    }

    async fn query_channels(
        &self,
        filter: &ChannelFilter,
    ) -> BackendResult<Vec<Arc<dyn ChannelHandle>>> {
        let mut state = self.inner.state();
        session_of(&state)?;

        let matching: Vec<(ChannelKey, ServerChannel)> = state
            .channels
            .iter()
            .filter(|(key, channel)| {
                filter.classes.contains(&key.class) && channel.members.contains_key(&filter.member)
            })
            .map(|(key, channel)| (key.clone(), channel.clone()))
            .collect();

        let mut handles: Vec<Arc<dyn ChannelHandle>> = Vec::with_capacity(matching.len());
        for (key, server) in matching {
            let handle = self.handle_for(&mut state, &key);
            handle.load(&server);
            handles.push(handle);
        }
        Ok(handles)
    }
}

fn validate_attributes(attributes: &ChannelAttributes) -> BackendResult<()> {
    if attributes.name.trim().is_empty() {
        return Err(BackendError::BadRequest("channel name must not be empty".into()));
    }
    if attributes.name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(BackendError::BadRequest(format!(
            "channel name exceeds {MAX_CHANNEL_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Channel handle
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LocalState {
    watching: bool,
    attributes: ChannelAttributes,
    members: BTreeMap<PrincipalId, MemberRole>,
}

/// Process-local mirror of one channel held by a [`MemoryBackend`].
pub struct MemoryChannel {
    key: ChannelKey,
    backend: Weak<Inner>,
    local: Mutex<LocalState>,
}

impl MemoryChannel {
    fn local(&self) -> MutexGuard<'_, LocalState> {
        self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self, server: &ServerChannel) {
        let mut local = self.local();
        local.watching = true;
        local.attributes = server.attributes.clone();
        local.members = server.members.clone();
    }

    fn inner(&self) -> BackendResult<Arc<Inner>> {
        self.backend
            .upgrade()
            .ok_or_else(|| BackendError::Network("backend dropped".into()))
    }

    /// Resolve the caller and their role in this channel.
    fn caller(
        &self,
        state: &ServerState,
    ) -> BackendResult<(PrincipalId, Option<MemberRole>)> {
        let caller = session_of(state)?;
        let channel = state
            .channels
            .get(&self.key)
            .ok_or_else(|| BackendError::NotFound(format!("channel {}", self.key)))?;
        let role = channel.members.get(&caller).copied();
        Ok((caller, role))
    }

    fn require_write(&self, caller: &PrincipalId, role: Option<MemberRole>) -> BackendResult<()> {
        match (self.key.class.tier(), role) {
            (_, None) => Err(BackendError::PermissionDenied(format!(
                "{caller} is not a member of {}",
                self.key
            ))),
            (PermissionTier::Open, Some(_)) => Ok(()),
            (PermissionTier::Restricted, Some(role)) if role.is_elevated() => Ok(()),
            (PermissionTier::Restricted, Some(_)) => Err(BackendError::PermissionDenied(format!(
                "{caller} may not modify restricted channel {}",
                self.key
            ))),
        }
    }
}

#[async_trait]
impl ChannelHandle for MemoryChannel {
    fn key(&self) -> &ChannelKey {
        &self.key
    }

    async fn watch(&self) -> BackendResult<()> {
        let inner = self.inner()?;
        let state = inner.state();
        let (caller, role) = self.caller(&state)?;
        if role.is_none() {
            return Err(BackendError::PermissionDenied(format!(
                "{caller} cannot read {}",
                self.key
            )));
        }
        if let Some(server) = state.channels.get(&self.key) {
            self.load(server);
        }
        Ok(())
    }

    fn is_watching(&self) -> bool {
        self.local().watching
    }

    fn cached_attributes(&self) -> ChannelAttributes {
        self.local().attributes.clone()
    }

    fn patch_local(&self, attributes: &ChannelAttributes) {
        self.local().attributes = attributes.clone();
    }

    async fn update(&self, attributes: &ChannelAttributes) -> BackendResult<()> {
        let inner = self.inner()?;
        inner.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = inner.state();

        if let Some(err) = state.failing_updates.get(&self.key) {
            return Err(err.clone());
        }
        validate_attributes(attributes)?;
        let (caller, role) = self.caller(&state)?;
        self.require_write(&caller, role)?;

        if let Some(channel) = state.channels.get_mut(&self.key) {
            channel.attributes = attributes.clone();
        }
        self.local().attributes = attributes.clone();
        Ok(())
    }

    fn members(&self) -> BTreeMap<PrincipalId, MemberRole> {
        self.local().members.clone()
    }

    async fn add_members(&self, ids: &[PrincipalId]) -> BackendResult<()> {
        let inner = self.inner()?;
        let mut state = inner.state();
        let (caller, role) = self.caller(&state)?;
        self.require_write(&caller, role)?;

        if let Some(missing) = ids.iter().find(|id| !state.users.contains_key(*id)) {
            return Err(BackendError::NotFound(format!("user {missing}")));
        }

        if let Some(channel) = state.channels.get_mut(&self.key) {
            for id in ids {
                channel
                    .members
                    .entry(id.clone())
                    .or_insert(MemberRole::Member);
            }
            self.local().members = channel.members.clone();
        }
        Ok(())
    }

    async fn remove_members(&self, ids: &[PrincipalId]) -> BackendResult<()> {
        let inner = self.inner()?;
        let mut state = inner.state();
        let (caller, role) = self.caller(&state)?;

        let only_self = ids.iter().all(|id| id == &caller);
        if !only_self && !role.is_some_and(MemberRole::is_elevated) {
            return Err(BackendError::PermissionDenied(format!(
                "{caller} may not remove other members from {}",
                self.key
            )));
        }

        if let Some(channel) = state.channels.get_mut(&self.key) {
            for id in ids {
                channel.members.remove(id);
            }
            self.local().members = channel.members.clone();
        }
        Ok(())
    }

    async fn delete(&self) -> BackendResult<()> {
        let inner = self.inner()?;
        let mut state = inner.state();
        let (caller, role) = self.caller(&state)?;
        if role != Some(MemberRole::Owner) {
            return Err(BackendError::PermissionDenied(format!(
                "only the owner may delete {}",
                self.key
            )));
        }

        state.channels.remove(&self.key);
        state.handles.remove(&self.key);
        debug!(channel = %self.key, by = %caller, "Channel deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tutorlink_shared::{ChannelClass, PrincipalClass};

    use super::*;

    fn principal(id: &str) -> Principal {
        Principal {
            id: PrincipalId::new(id),
            display_name: format!("User {id}"),
            avatar_url: None,
            class: PrincipalClass::Learner,
        }
    }

    fn attrs(name: &str) -> ChannelAttributes {
        ChannelAttributes {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn any_token(id: &str) -> IssuedToken {
        token::mint(&[0u8; 32], &PrincipalId::new(id), chrono::Duration::minutes(5))
    }

    async fn connected(id: &str) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.seed_user(principal(id));
        backend
            .connect(&PrincipalId::new(id), &any_token(id))
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let backend = MemoryBackend::new();
        let key = ChannelKey::new(ChannelClass::Group, "g1");
        backend.seed_channel(key.clone(), attrs("G"), &[(PrincipalId::new("u1"), MemberRole::Owner)]);

        assert_eq!(
            backend.channel(&key).watch().await,
            Err(BackendError::NotConnected)
        );
        assert!(matches!(
            backend.query_channels(&ChannelFilter::member_of(PrincipalId::new("u1"))).await,
            Err(BackendError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_restricted_channel_rejects_plain_member() {
        let backend = connected("u1").await;
        let key = ChannelKey::new(ChannelClass::PremiumGroup, "p1");
        backend.seed_channel(
            key.clone(),
            attrs("Old"),
            &[
                (PrincipalId::new("owner"), MemberRole::Owner),
                (PrincipalId::new("u1"), MemberRole::Member),
            ],
        );

        let handle = backend.channel(&key);
        handle.watch().await.unwrap();
        let err = handle.update(&attrs("New")).await.unwrap_err();

        assert!(err.is_permission_denied());
        assert_eq!(backend.server_attributes(&key).unwrap().name, "Old");
    }

    #[tokio::test]
    async fn test_open_channel_accepts_member_update() {
        let backend = connected("u1").await;
        let key = ChannelKey::new(ChannelClass::Group, "g1");
        backend.seed_channel(key.clone(), attrs("Old"), &[(PrincipalId::new("u1"), MemberRole::Member)]);

        let handle = backend.channel(&key);
        handle.update(&attrs("New")).await.unwrap();

        assert_eq!(backend.server_attributes(&key).unwrap().name, "New");
        assert_eq!(handle.cached_attributes().name, "New");
    }

    #[tokio::test]
    async fn test_bad_request_checked_before_permission() {
        let backend = connected("u1").await;
        let key = ChannelKey::new(ChannelClass::Class, "c1");
        backend.seed_channel(key.clone(), attrs("Old"), &[(PrincipalId::new("u1"), MemberRole::Member)]);

        let err = backend.channel(&key).update(&attrs("  ")).await.unwrap_err();
        assert!(matches!(err, BackendError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_handles_are_shared_within_session() {
        let backend = connected("u1").await;
        let key = ChannelKey::new(ChannelClass::Group, "g1");
        backend.seed_channel(key.clone(), attrs("Server"), &[(PrincipalId::new("u1"), MemberRole::Member)]);

        backend.channel(&key).patch_local(&attrs("Local"));
        assert_eq!(backend.channel(&key).cached_attributes().name, "Local");
        assert_eq!(backend.server_attributes(&key).unwrap().name, "Server");

        backend.disconnect_current_user().await.unwrap();
        assert_eq!(backend.channel(&key).cached_attributes().name, "");
    }

    #[tokio::test]
    async fn test_add_members_requires_known_users() {
        let backend = connected("u1").await;
        let key = ChannelKey::new(ChannelClass::Group, "g1");
        backend.seed_channel(key.clone(), attrs("G"), &[(PrincipalId::new("u1"), MemberRole::Owner)]);

        let handle = backend.channel(&key);
        let err = handle.add_members(&[PrincipalId::new("ghost")]).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));

        backend.seed_user(principal("u2"));
        handle.add_members(&[PrincipalId::new("u2")]).await.unwrap();
        assert!(handle.members().contains_key(&PrincipalId::new("u2")));
    }

    #[tokio::test]
    async fn test_remove_and_delete_permissions() {
        let backend = connected("u1").await;
        let key = ChannelKey::new(ChannelClass::Group, "g1");
        backend.seed_channel(
            key.clone(),
            attrs("G"),
            &[
                (PrincipalId::new("owner"), MemberRole::Owner),
                (PrincipalId::new("u1"), MemberRole::Member),
                (PrincipalId::new("u2"), MemberRole::Member),
            ],
        );
        let handle = backend.channel(&key);

        assert!(handle
            .remove_members(&[PrincipalId::new("u2")])
            .await
            .unwrap_err()
            .is_permission_denied());
        assert!(handle.delete().await.unwrap_err().is_permission_denied());

        handle.remove_members(&[PrincipalId::new("u1")]).await.unwrap();
        assert!(!backend
            .server_members(&key)
            .unwrap()
            .contains_key(&PrincipalId::new("u1")));
    }

    #[tokio::test]
    async fn test_connect_verifies_token() {
        let secret = [9u8; 32];
        let backend = MemoryBackend::with_token_secret(secret);
        let u1 = PrincipalId::new("u1");

        let expired = token::mint_at(
            &secret,
            &u1,
            Utc::now() - chrono::Duration::hours(2),
            chrono::Duration::hours(1),
        );
        assert!(matches!(
            backend.connect(&u1, &expired).await,
            Err(BackendError::Unauthenticated(_))
        ));

        let other = token::mint(&secret, &PrincipalId::new("u2"), chrono::Duration::minutes(5));
        assert!(matches!(
            backend.connect(&u1, &other).await,
            Err(BackendError::Unauthenticated(_))
        ));

        let fresh = token::mint(&secret, &u1, chrono::Duration::minutes(5));
        backend.connect(&u1, &fresh).await.unwrap();
        assert_eq!(backend.current_user(), Some(u1));
        assert_eq!(backend.connect_calls(), 3);
    }

    #[tokio::test]
    async fn test_create_channel_assigns_owner() {
        let backend = connected("t1").await;
        backend.seed_user(principal("u2"));
        let key = ChannelKey::new(ChannelClass::Class, "c1");

        let handle = backend
            .create_channel(&ChannelSpec {
                key: key.clone(),
                attributes: attrs("Piano 101"),
                members: vec![PrincipalId::new("u2")],
                created_by: PrincipalId::new("t1"),
            })
            .await
            .unwrap();

        assert!(handle.is_watching());
        assert_eq!(
            handle.members().get(&PrincipalId::new("t1")),
            Some(&MemberRole::Owner)
        );
        assert!(matches!(
            backend
                .create_channel(&ChannelSpec {
                    key,
                    attributes: attrs("Piano 101"),
                    members: vec![],
                    created_by: PrincipalId::new("t1"),
                })
                .await,
            Err(BackendError::BadRequest(_))
        ));
    }
}
