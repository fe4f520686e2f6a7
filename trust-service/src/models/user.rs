//! User security state - the subset of the user entity this service touches.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::StoredRecoveryCode;

#[derive(Debug, Clone)]
pub struct UserSecurityState {
    pub user_id: Uuid,
    /// Bumped on password change/reset and "sign out everywhere". Any claim
    /// carrying an older value is dead.
    pub session_version: i64,
    pub second_factor_secret: Option<String>,
    pub second_factor_enabled: bool,
    pub second_factor_enabled_at: Option<DateTime<Utc>>,
    pub recovery_codes: Vec<StoredRecoveryCode>,
    /// Last accepted TOTP time step. A code from this step or earlier is a replay.
    pub last_totp_step: Option<i64>,
    pub must_change_password: bool,
    pub is_superadmin: bool,
}

impl UserSecurityState {
    /// Create a user with no second factor at session version 1.
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            session_version: 1,
            second_factor_secret: None,
            second_factor_enabled: false,
            second_factor_enabled_at: None,
            recovery_codes: Vec::new(),
            last_totp_step: None,
            must_change_password: false,
            is_superadmin: false,
        }
    }

    /// Second factor is usable only when enabled and a secret is on file.
    pub fn has_second_factor(&self) -> bool {
        self.second_factor_enabled && self.second_factor_secret.is_some()
    }

    /// Number of recovery codes not yet consumed.
    pub fn unused_recovery_codes(&self) -> usize {
        self.recovery_codes.iter().filter(|c| !c.is_used()).count()
    }
}
