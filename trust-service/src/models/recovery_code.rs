//! Stored recovery code - hash plus consumption marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecoveryCode {
    /// Hex HMAC over the owning subject id and the normalized code.
    pub hash: String,
    pub used_at: Option<DateTime<Utc>>,
}

impl StoredRecoveryCode {
    pub fn new(hash: String) -> Self {
        Self {
            hash,
            used_at: None,
        }
    }

    /// Once set, `used_at` is permanent.
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}
