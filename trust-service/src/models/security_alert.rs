//! Security alert model - leveled notifications derived from audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warn,
    High,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warn => "WARN",
            AlertLevel::High => "HIGH",
        }
    }
}

impl std::str::FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(AlertLevel::Info),
            "WARN" => Ok(AlertLevel::Warn),
            "HIGH" => Ok(AlertLevel::High),
            _ => Err(format!("Invalid alert level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    pub alert_id: Uuid,
    pub tenant_id: Uuid,
    /// Back-reference to the audit record the alert was derived from.
    pub audit_id: Uuid,
    pub level: AlertLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(tenant_id: Uuid, audit_id: Uuid, level: AlertLevel, message: String) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            tenant_id,
            audit_id,
            level,
            message,
            created_at: Utc::now(),
        }
    }
}
