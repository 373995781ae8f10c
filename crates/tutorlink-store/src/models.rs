//! Row-level models persisted in the local metadata database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tutorlink_shared::PrincipalId;

// ---------------------------------------------------------------------------
// Principal record
// ---------------------------------------------------------------------------

/// A principal's display record inside one principal collection.
///
/// The collection it was read from decides the principal's class; the
/// record itself carries only display attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrincipalRecord {
    pub id: PrincipalId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}
