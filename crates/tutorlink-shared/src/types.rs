use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Principal identity = the stable key shared by the metadata store and the
// messaging backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalClass {
    Learner,
    Instructor,
    Guest,
}

impl PrincipalClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Learner => "learner",
            Self::Instructor => "instructor",
            Self::Guest => "guest",
        }
    }
}

/// A user known to both the metadata store and the messaging backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub class: PrincipalClass,
}

/// Who may write channel metadata on the messaging backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionTier {
    /// Any member may update name/image/description.
    Open,
    /// Only the owner or a moderator may update; other writes are rejected.
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelClass {
    /// One-to-one conversation.
    Messaging,
    /// Standard study group.
    Group,
    PremiumGroup,
    /// Channel scoped to a single booked class.
    Class,
}

impl ChannelClass {
    pub const ALL: [ChannelClass; 4] = [
        ChannelClass::Messaging,
        ChannelClass::Group,
        ChannelClass::PremiumGroup,
        ChannelClass::Class,
    ];

    pub fn tier(self) -> PermissionTier {
        match self {
            Self::Messaging | Self::Group => PermissionTier::Open,
            Self::PremiumGroup | Self::Class => PermissionTier::Restricted,
        }
    }

    /// Metadata store collection holding the records for this class.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Messaging => "conversations",
            Self::Group => "groups",
            Self::PremiumGroup => "premium_groups",
            Self::Class => "classes",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messaging => "messaging",
            Self::Group => "group",
            Self::PremiumGroup => "premium_group",
            Self::Class => "class",
        }
    }
}

impl fmt::Display for ChannelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| format!("unknown channel class: {s}"))
    }
}

/// `(channelClass, channelId)`, the identity of a channel in both stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub class: ChannelClass,
    pub id: String,
}

impl ChannelKey {
    pub fn new(class: ChannelClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// The display attributes mirrored onto a messaging channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelAttributes {
    pub name: String,
    pub description: String,
    pub image: Option<String>,
}

/// Authoritative description of a channel, as held by the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRecord {
    pub key: ChannelKey,
    pub display_name: String,
    pub description: String,
    pub avatar_url: Option<String>,
    pub member_ids: BTreeSet<PrincipalId>,
    pub owner_id: Option<PrincipalId>,
}

impl ChannelRecord {
    pub fn desired_attributes(&self) -> ChannelAttributes {
        ChannelAttributes {
            name: self.display_name.clone(),
            description: self.description.clone(),
            image: self.avatar_url.clone(),
        }
    }
}
