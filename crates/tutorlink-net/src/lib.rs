// Messaging-backend and credential-authority clients.

pub mod backend;
pub mod credentials;
pub mod memory;

pub use backend::{
    BackendResult, ChannelFilter, ChannelHandle, ChannelSpec, MemberRole, MessagingBackend,
};
pub use credentials::{CredentialProvider, HttpCredentialProvider};
#[cfg(any(test, feature = "dev-tokens"))]
pub use credentials::{DevTokenMinter, FallbackCredentials};
pub use memory::MemoryBackend;
