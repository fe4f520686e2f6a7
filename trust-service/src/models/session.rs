//! Session model - revocable server-side session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Server-side session record. Created at login by the identity layer; this
/// service only revokes it or clears `requires_step_up`.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by_user_id: Option<Uuid>,
    pub revoked_reason: Option<String>,
    pub requires_step_up: bool,
    pub device_hash: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a new live session.
    pub fn new(user_id: Uuid, device_hash: Option<String>, requires_step_up: bool) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            revoked_at: None,
            revoked_by_user_id: None,
            revoked_reason: None,
            requires_step_up,
            device_hash,
            last_seen_at: now,
            created_at: now,
        }
    }

    /// A session is live until it is revoked.
    pub fn is_live(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// The identity a request claims to act as.
///
/// Carried by the caller on every request; never trusted on its own, always
/// reconciled against the authoritative user and session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaim {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub session_version: i64,
}

impl SessionClaim {
    pub fn for_session(session: &SessionRecord, session_version: i64) -> Self {
        Self {
            user_id: session.user_id,
            session_id: session.session_id,
            session_version,
        }
    }
}
