/// Application name
pub const APP_NAME: &str = "Tutorlink";

/// Bound applied to every network call (token fetch, connect, channel op)
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 15;

/// Minimum wait after a failed reconnect before another attempt is made
pub const RECONNECT_COOLDOWN_SECS: u64 = 5;

/// Lifetime of a freshly minted session token
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Default HTTP port of the credential authority
pub const DEFAULT_TOKEN_PORT: u16 = 8090;

/// Path of the token endpoint on the credential authority
pub const TOKEN_PATH: &str = "/v1/token";

/// Longest channel name the messaging backend accepts
pub const MAX_CHANNEL_NAME_LEN: usize = 256;

/// Principal collections in the metadata store, in lookup order
pub const INSTRUCTOR_COLLECTION: &str = "instructors";
pub const LEARNER_COLLECTION: &str = "learners";
pub const GUEST_COLLECTION: &str = "guests";

/// Key derivation context (BLAKE3) for the development token secret
pub const KDF_CONTEXT_DEV_TOKEN: &str = "tutorlink-dev-token-secret-v1";
