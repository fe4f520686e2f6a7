//! Tenant plan policy - the parts of a tenant's plan the trust boundary reads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Plan tiers ordered low to high; the derived `Ord` is the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Pro,
    Business,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Pro => "pro",
            PlanTier::Business => "business",
            PlanTier::Enterprise => "enterprise",
        }
    }

    /// Lenient parse for tier names found in audit metadata.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "starter" => Ok(PlanTier::Starter),
            "pro" => Ok(PlanTier::Pro),
            "business" => Ok(PlanTier::Business),
            "enterprise" => Ok(PlanTier::Enterprise),
            _ => Err(format!("Invalid plan tier: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TenantPolicy {
    pub tenant_id: Uuid,
    pub security_alerts_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ranking_is_ordered() {
        assert!(PlanTier::Free < PlanTier::Starter);
        assert!(PlanTier::Pro < PlanTier::Enterprise);
        assert_eq!(PlanTier::parse(" Business "), Some(PlanTier::Business));
        assert_eq!(PlanTier::parse("platinum"), None);
    }
}
