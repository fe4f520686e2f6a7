//! Security alerts derived from audit events.
//!
//! Classification is a rule list evaluated top to bottom; the first rule that
//! matches an event decides its level and message, so an event yields at most
//! one alert. Plan rules are ordered most specific first.

use std::sync::Arc;

use serde_json::Value;

use super::error::ServiceError;
use super::store::{AlertStore, TenantPolicyStore};
use crate::models::{actions, AlertLevel, AuditEvent, PlanTier, SecurityAlert};

enum Message {
    Fixed(&'static str),
    Render(fn(&AuditEvent) -> String),
}

struct AlertRule {
    action: &'static str,
    when: fn(&AuditEvent) -> bool,
    level: AlertLevel,
    message: Message,
}

fn always(_: &AuditEvent) -> bool {
    true
}

const RULES: &[AlertRule] = &[
    AlertRule {
        action: actions::MFA_POLICY_ENABLED,
        when: always,
        level: AlertLevel::Warn,
        message: Message::Fixed("Mandatory MFA policy enabled"),
    },
    AlertRule {
        action: actions::MFA_POLICY_DISABLED,
        when: always,
        level: AlertLevel::Warn,
        message: Message::Fixed("Mandatory MFA policy disabled"),
    },
    AlertRule {
        action: actions::MFA_ENROLLED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("Second factor enrolled"),
    },
    AlertRule {
        action: actions::MFA_VERIFY_FAILED,
        when: always,
        level: AlertLevel::Warn,
        message: Message::Fixed("Second factor verification failed"),
    },
    AlertRule {
        action: actions::MFA_RECOVERY_GENERATED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("Recovery codes generated"),
    },
    AlertRule {
        action: actions::MFA_RECOVERY_USED,
        when: always,
        level: AlertLevel::Warn,
        message: Message::Fixed("Recovery code used"),
    },
    AlertRule {
        action: actions::MFA_ADMIN_RESET,
        when: always,
        level: AlertLevel::High,
        message: Message::Fixed("Second factor removed by an administrator"),
    },
    AlertRule {
        action: actions::IMPERSONATION_STARTED,
        when: always,
        level: AlertLevel::Warn,
        message: Message::Render(impersonation_message),
    },
    AlertRule {
        action: actions::PLAN_UPDATED,
        when: security_module_disabled,
        level: AlertLevel::Warn,
        message: Message::Fixed("Security module disabled"),
    },
    AlertRule {
        action: actions::PLAN_UPDATED,
        when: legal_module_disabled,
        level: AlertLevel::Warn,
        message: Message::Fixed("Legal/compliance module disabled"),
    },
    AlertRule {
        action: actions::PLAN_UPDATED,
        when: is_downgrade,
        level: AlertLevel::Warn,
        message: Message::Render(downgrade_message),
    },
    AlertRule {
        action: actions::PLAN_UPDATED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("Plan updated"),
    },
    AlertRule {
        action: actions::LEGAL_SETTINGS_UPDATED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("Legal settings updated"),
    },
    AlertRule {
        action: actions::DOMAIN_UPDATED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("Custom domain updated"),
    },
    AlertRule {
        action: actions::DOMAIN_VERIFIED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("Custom domain verified"),
    },
    AlertRule {
        action: actions::USER_ADDED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("User added"),
    },
    AlertRule {
        action: actions::USER_INVITED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("User invited"),
    },
    AlertRule {
        action: actions::USER_REMOVED,
        when: always,
        level: AlertLevel::Warn,
        message: Message::Fixed("User removed"),
    },
    AlertRule {
        action: actions::USER_ROLE_CHANGED,
        when: always,
        level: AlertLevel::Info,
        message: Message::Fixed("User role changed"),
    },
];

fn impersonation_message(event: &AuditEvent) -> String {
    let tenant = event.tenant_id.map(|id| id.to_string()).or_else(|| {
        event
            .meta
            .get("tenant_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    match tenant {
        Some(tenant) => format!("Superadmin entered tenant context {}", tenant),
        None => "Superadmin entered a tenant context".to_string(),
    }
}

/// Enabled in `modules_before` and not enabled in `modules_after`.
fn module_disabled(event: &AuditEvent, module: &str) -> bool {
    let before = event
        .meta
        .get("modules_before")
        .and_then(|m| m.get(module))
        .and_then(Value::as_bool);
    let Some(after) = event.meta.get("modules_after").filter(|m| m.is_object()) else {
        return false;
    };

    before == Some(true) && after.get(module).and_then(Value::as_bool) != Some(true)
}

fn security_module_disabled(event: &AuditEvent) -> bool {
    module_disabled(event, "security")
}

fn legal_module_disabled(event: &AuditEvent) -> bool {
    module_disabled(event, "legal")
}

fn tier(event: &AuditEvent, key: &str) -> Option<PlanTier> {
    event
        .meta
        .get(key)
        .and_then(Value::as_str)
        .and_then(PlanTier::parse)
}

fn is_downgrade(event: &AuditEvent) -> bool {
    if event.meta.get("downgrade").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    matches!((tier(event, "from"), tier(event, "to")), (Some(from), Some(to)) if to < from)
}

fn downgrade_message(event: &AuditEvent) -> String {
    match (tier(event, "from"), tier(event, "to")) {
        (Some(from), Some(to)) => {
            format!("Plan downgraded from {} to {}", from.as_str(), to.as_str())
        }
        _ => "Plan downgraded".to_string(),
    }
}

/// Classify an event against the rule list. `None` means no alert.
pub fn classify(event: &AuditEvent) -> Option<(AlertLevel, String)> {
    RULES
        .iter()
        .find(|rule| rule.action == event.action && (rule.when)(event))
        .map(|rule| {
            let message = match &rule.message {
                Message::Fixed(text) => text.to_string(),
                Message::Render(render) => render(event),
            };
            (rule.level, message)
        })
}

/// Best-effort projection of audit events into security alerts.
#[derive(Clone)]
pub struct AlertEngine {
    policies: Arc<dyn TenantPolicyStore>,
    alerts: Arc<dyn AlertStore>,
}

impl AlertEngine {
    pub fn new(policies: Arc<dyn TenantPolicyStore>, alerts: Arc<dyn AlertStore>) -> Self {
        Self { policies, alerts }
    }

    /// Derive and persist an alert for an audit record that is already written.
    /// Never fails: errors are logged and dropped.
    pub async fn on_audit_written(&self, event: &AuditEvent) {
        match self.derive(event).await {
            Ok(Some(alert)) => {
                tracing::info!(
                    tenant_id = %alert.tenant_id,
                    audit_id = %alert.audit_id,
                    level = alert.level.as_str(),
                    action = %event.action,
                    "Security alert raised"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    audit_id = %event.audit_id,
                    action = %event.action,
                    error = %e,
                    "Failed to derive security alert"
                );
            }
        }
    }

    async fn derive(&self, event: &AuditEvent) -> Result<Option<SecurityAlert>, ServiceError> {
        let Some(tenant_id) = event.tenant_id else {
            return Ok(None);
        };

        let enabled = self
            .policies
            .find_tenant_policy(tenant_id)
            .await?
            .is_some_and(|policy| policy.security_alerts_enabled);
        if !enabled {
            return Ok(None);
        }

        let Some((level, message)) = classify(event) else {
            return Ok(None);
        };

        let alert = SecurityAlert::new(tenant_id, event.audit_id, level, message);
        self.alerts.insert_alert(&alert).await?;
        Ok(Some(alert))
    }
}
