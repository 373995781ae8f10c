//! # tutorlink-store
//!
//! The metadata store as seen by the reconciliation core: a read-only
//! [`MetadataStore`] interface over group/class/conversation records and
//! principal records, plus a SQLite-backed [`Database`] that implements it.
//!
//! The authoritative store lives outside this process; `Database` serves as
//! a local mirror and as the development / test backing.

pub mod channel_records;
pub mod database;
pub mod metadata;
pub mod migrations;
pub mod models;
pub mod principals;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use metadata::MetadataStore;
pub use models::*;
