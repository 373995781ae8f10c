// Types, errors and token format shared by every tutorlink crate.

pub mod constants;
pub mod error;
pub mod token;
pub mod types;

pub use error::{AuthError, BackendError, TokenError};
pub use token::{IssuedToken, TokenClaims, TokenRequest};
pub use types::{
    ChannelAttributes, ChannelClass, ChannelKey, ChannelRecord, PermissionTier, Principal,
    PrincipalClass, PrincipalId,
};
