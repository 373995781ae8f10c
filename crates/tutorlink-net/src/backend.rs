//! Client-side interface to the messaging backend.
//!
//! The backend owns chat channels, their live membership and the user
//! directory.  A [`ChannelHandle`] is the process-local mirror of one
//! channel: it carries a local attribute cache that readers (UI included)
//! observe, which may be patched independently of the server-side copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tutorlink_shared::{
    BackendError, ChannelAttributes, ChannelClass, ChannelKey, IssuedToken, Principal,
    PrincipalId,
};

pub type BackendResult<T> = Result<T, BackendError>;

/// A member's role inside one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Moderator,
    Member,
}

impl MemberRole {
    /// Whether this role may write metadata on a restricted-tier channel.
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::Owner | Self::Moderator)
    }
}

/// Everything needed to create a channel on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub key: ChannelKey,
    pub attributes: ChannelAttributes,
    pub members: Vec<PrincipalId>,
    /// Receives the owner role.
    pub created_by: PrincipalId,
}

/// Membership query across channel classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    pub member: PrincipalId,
    pub classes: Vec<ChannelClass>,
}

impl ChannelFilter {
    /// Every channel, of any known class, that `member` belongs to.
    pub fn member_of(member: PrincipalId) -> Self {
        Self {
            member,
            classes: ChannelClass::ALL.to_vec(),
        }
    }
}

#[async_trait]
pub trait MessagingBackend: Send + Sync {
    /// Open the session for `principal` using a freshly issued token.
    async fn connect(&self, principal: &PrincipalId, token: &IssuedToken) -> BackendResult<()>;

    async fn disconnect_current_user(&self) -> BackendResult<()>;

    /// Create or overwrite a user in the backend's directory.
    async fn upsert_user(&self, principal: &Principal) -> BackendResult<()>;

    /// Users whose id equals `id` (zero or one entry).
    async fn query_users(&self, id: &PrincipalId) -> BackendResult<Vec<Principal>>;

    /// The process-local handle for a channel.  Repeated calls return the
    /// same handle while the session lasts; no network call is made until
    /// the handle is watched.
    fn channel(&self, key: &ChannelKey) -> Arc<dyn ChannelHandle>;

    async fn create_channel(&self, spec: &ChannelSpec) -> BackendResult<Arc<dyn ChannelHandle>>;

    /// Channels matching `filter`, returned already watched with their
    /// state freshly loaded from the server.
    async fn query_channels(&self, filter: &ChannelFilter)
        -> BackendResult<Vec<Arc<dyn ChannelHandle>>>;
}

#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn key(&self) -> &ChannelKey;

    /// Subscribe to the channel and load its server state into the cache.
    async fn watch(&self) -> BackendResult<()>;

    fn is_watching(&self) -> bool;

    /// What readers of this handle currently observe.
    fn cached_attributes(&self) -> ChannelAttributes;

    /// Overwrite the local cache only; nothing is sent to the server.
    fn patch_local(&self, attributes: &ChannelAttributes);

    /// Write attributes server-side.  Restricted-tier channels reject
    /// writes from non-elevated members with `PermissionDenied`.
    async fn update(&self, attributes: &ChannelAttributes) -> BackendResult<()>;

    /// Live membership as last observed by this handle.
    fn members(&self) -> BTreeMap<PrincipalId, MemberRole>;

    async fn add_members(&self, ids: &[PrincipalId]) -> BackendResult<()>;

    async fn remove_members(&self, ids: &[PrincipalId]) -> BackendResult<()>;

    async fn delete(&self) -> BackendResult<()>;
}
