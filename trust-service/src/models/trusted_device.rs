//! Trusted device model - devices approved by a successful step-up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct TrustedDevice {
    pub user_id: Uuid,
    pub device_hash: String,
    pub label: Option<String>,
    pub approved_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
}

impl TrustedDevice {
    pub fn new(user_id: Uuid, device_hash: String, label: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            device_hash,
            label,
            approved_at: now,
            revoked_at: None,
            last_seen_at: now,
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.revoked_at.is_none()
    }
}
