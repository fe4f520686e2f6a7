//! Domain models for the trust boundary.

pub mod audit_event;
pub mod recovery_code;
pub mod security_alert;
pub mod session;
pub mod tenant;
pub mod trusted_device;
pub mod user;

pub use audit_event::{actions, AuditEvent};
pub use recovery_code::StoredRecoveryCode;
pub use security_alert::{AlertLevel, SecurityAlert};
pub use session::{SessionClaim, SessionRecord};
pub use tenant::{PlanTier, TenantPolicy};
pub use trusted_device::TrustedDevice;
pub use user::UserSecurityState;
