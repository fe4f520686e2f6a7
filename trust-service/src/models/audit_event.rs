//! Audit event model - security and compliance logging.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Action tags written to the audit log. Security alert classification keys
/// off these strings.
pub mod actions {
    pub const MFA_POLICY_ENABLED: &str = "mfa.policy.enabled";
    pub const MFA_POLICY_DISABLED: &str = "mfa.policy.disabled";
    pub const MFA_ENROLLED: &str = "mfa.enrolled";
    pub const MFA_VERIFY_FAILED: &str = "mfa.verify.failed";
    pub const MFA_RECOVERY_GENERATED: &str = "mfa.recovery.generated";
    pub const MFA_RECOVERY_USED: &str = "mfa.recovery.used";
    pub const MFA_ADMIN_RESET: &str = "mfa.admin_reset";

    pub const IMPERSONATION_STARTED: &str = "impersonation.started";
    pub const IMPERSONATION_ENDED: &str = "impersonation.ended";

    pub const PLAN_UPDATED: &str = "plan.updated";
    pub const LEGAL_SETTINGS_UPDATED: &str = "legal.settings.updated";
    pub const DOMAIN_UPDATED: &str = "domain.updated";
    pub const DOMAIN_VERIFIED: &str = "domain.verified";

    pub const USER_ADDED: &str = "user.added";
    pub const USER_INVITED: &str = "user.invited";
    pub const USER_REMOVED: &str = "user.removed";
    pub const USER_ROLE_CHANGED: &str = "user.role_changed";

    pub const SESSION_REVOKED: &str = "session.revoked";
    pub const SESSIONS_REVOKED_ALL: &str = "session.revoked_all";
    pub const DEVICE_REVOKED: &str = "device.revoked";
}

/// Audit event entity.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEvent {
    pub audit_id: Uuid,
    /// `None` for account-wide / control-plane actions.
    pub tenant_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<Uuid>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: &str) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            tenant_id: None,
            actor_user_id: None,
            action: action.to_string(),
            target_type: None,
            target_id: None,
            meta: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn tenant(mut self, tenant_id: Option<Uuid>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn actor(mut self, actor_user_id: Uuid) -> Self {
        self.actor_user_id = Some(actor_user_id);
        self
    }

    pub fn target(mut self, target_type: &str, target_id: Uuid) -> Self {
        self.target_type = Some(target_type.to_string());
        self.target_id = Some(target_id);
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}
