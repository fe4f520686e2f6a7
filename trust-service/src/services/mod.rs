//! Trust boundary services.

pub mod access;
pub mod alerts;
pub mod audit;
pub mod database;
pub mod error;
pub mod impersonation;
pub mod mfa;
pub mod recovery;
pub mod second_factor;
pub mod session_guard;
pub mod sessions;
pub mod step_up;
pub mod store;

pub use access::{
    AccessGrant, AccessOrchestrator, AccessPolicy, Denial, ForbiddenReason, StepUpCredentials,
    TenantContext,
};
pub use alerts::AlertEngine;
pub use audit::AuditService;
pub use database::Database;
pub use error::ServiceError;
pub use impersonation::{ImpersonationService, IMPERSONATION_COOKIE};
pub use mfa::{MfaService, PresentedCode, StepUpIssued, StepUpRequest};
pub use recovery::{ConsumeOutcome, RecoveryVault};
pub use second_factor::{Provisioned, SecondFactorVerifier, TotpVerifier};
pub use session_guard::{SessionGuard, Verdict};
pub use sessions::{SessionService, SignOutSummary};
pub use step_up::{
    Scope, StepUpAssertion, StepUpCodec, TokenError, GLOBAL_STEP_UP_COOKIE, PURPOSE_IMPERSONATION,
    PURPOSE_STEP_UP,
};
pub use store::{
    AlertStore, AuditStore, MemoryStore, SessionStore, TenantPolicyStore, TrustedDeviceStore,
    UserStore,
};
