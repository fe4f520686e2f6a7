//! Per-request access decisions for sensitive actions.
//!
//! Order of checks: acting user, pending password change, session guard,
//! superadmin requirement, tenant context and role, then recent second factor.

use std::sync::Arc;

use chrono::Duration;
use service_core::error::AppError;
use uuid::Uuid;

use super::impersonation::ImpersonationService;
use super::session_guard::{SessionGuard, Verdict};
use super::step_up::{Scope, StepUpAssertion, StepUpCodec};
use super::store::UserStore;
use crate::models::{SessionClaim, UserSecurityState};

/// What an endpoint demands of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub tenant_id: Option<Uuid>,
    /// Require a step-up verified within the recency window.
    pub recent_step_up: bool,
    /// Reject sessions still flagged `requires_step_up`.
    pub enforce_session_step_up: bool,
    pub superadmin_only: bool,
    /// Members must hold the tenant admin role. Impersonating superadmins pass.
    pub tenant_admin: bool,
}

impl AccessPolicy {
    /// Live session only. Used by the step-up verification itself.
    pub fn session() -> Self {
        Self {
            tenant_id: None,
            recent_step_up: false,
            enforce_session_step_up: false,
            superadmin_only: false,
            tenant_admin: false,
        }
    }

    pub fn account() -> Self {
        Self {
            enforce_session_step_up: true,
            ..Self::session()
        }
    }

    /// Account-wide action needing a recent global step-up.
    pub fn account_sensitive() -> Self {
        Self {
            recent_step_up: true,
            ..Self::account()
        }
    }

    pub fn tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::account()
        }
    }

    pub fn tenant_sensitive(tenant_id: Uuid) -> Self {
        Self {
            recent_step_up: true,
            ..Self::tenant(tenant_id)
        }
    }

    /// Acting on other members of a tenant.
    pub fn tenant_admin(tenant_id: Uuid) -> Self {
        Self {
            tenant_admin: true,
            ..Self::tenant_sensitive(tenant_id)
        }
    }

    pub fn superadmin() -> Self {
        Self {
            superadmin_only: true,
            ..Self::account()
        }
    }

    pub fn scope(&self) -> Scope {
        self.tenant_id.map(Scope::Tenant).unwrap_or(Scope::Global)
    }

    /// Tenant and admin routes stay closed until a pending password change is done.
    fn blocked_by_password_change(&self) -> bool {
        self.tenant_id.is_some() || self.superadmin_only
    }
}

/// Tokens the caller presented, usually from cookies.
#[derive(Debug, Clone, Default)]
pub struct StepUpCredentials {
    pub tenant_token: Option<String>,
    pub global_token: Option<String>,
    pub impersonation_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantContext {
    Member(Uuid),
    Impersonating(Uuid),
}

impl TenantContext {
    pub fn tenant_id(&self) -> Uuid {
        match self {
            TenantContext::Member(id) | TenantContext::Impersonating(id) => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub user: UserSecurityState,
    pub claim: SessionClaim,
    pub tenant: Option<TenantContext>,
    /// The assertion that satisfied a recent-step-up policy.
    pub step_up: Option<StepUpAssertion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    PasswordChangeRequired,
    NotTenantMember,
    NotTenantAdmin,
    SuperadminOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    Unauthenticated,
    StepUpRequired { redirect_to: String },
    Forbidden(ForbiddenReason),
    /// A backing store failed; the request is refused.
    Unavailable,
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Unauthenticated => AppError::Unauthorized(anyhow::anyhow!("Unauthenticated")),
            Denial::StepUpRequired { redirect_to } => AppError::StepUpRequired(redirect_to),
            Denial::Forbidden(ForbiddenReason::PasswordChangeRequired) => {
                AppError::Forbidden(anyhow::anyhow!("Password change required"))
            }
            Denial::Forbidden(_) => AppError::Forbidden(anyhow::anyhow!("Forbidden")),
            Denial::Unavailable => AppError::ServiceUnavailable,
        }
    }
}

#[derive(Clone)]
pub struct AccessOrchestrator {
    users: Arc<dyn UserStore>,
    guard: SessionGuard,
    step_up: StepUpCodec,
    impersonation: ImpersonationService,
    recent_window: Duration,
    accept_global: bool,
    redirect_path: String,
}

impl AccessOrchestrator {
    pub fn new(
        users: Arc<dyn UserStore>,
        guard: SessionGuard,
        step_up: StepUpCodec,
        impersonation: ImpersonationService,
        recent_window: Duration,
        accept_global: bool,
        redirect_path: impl Into<String>,
    ) -> Self {
        Self {
            users,
            guard,
            step_up,
            impersonation,
            recent_window,
            accept_global,
            redirect_path: redirect_path.into(),
        }
    }

    fn step_up_required(&self, scope: Scope) -> Denial {
        Denial::StepUpRequired {
            redirect_to: format!("{}?scope={}", self.redirect_path, scope),
        }
    }

    #[tracing::instrument(
        skip(self, claim, credentials),
        fields(user_id = %claim.user_id, session_id = %claim.session_id)
    )]
    pub async fn authorize(
        &self,
        claim: &SessionClaim,
        policy: AccessPolicy,
        credentials: &StepUpCredentials,
    ) -> Result<AccessGrant, Denial> {
        let user = match self.users.find_user(claim.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(Denial::Unauthenticated),
            Err(e) => {
                tracing::error!(error = %e, "User lookup failed");
                return Err(Denial::Unavailable);
            }
        };

        if user.must_change_password && policy.blocked_by_password_change() {
            return Err(Denial::Forbidden(ForbiddenReason::PasswordChangeRequired));
        }

        let verdict = self
            .guard
            .evaluate_for(claim, &user, policy.enforce_session_step_up)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Session lookup failed");
                Denial::Unavailable
            })?;
        match verdict {
            Verdict::LiveOk => {}
            Verdict::LiveStepUpRequired => return Err(self.step_up_required(policy.scope())),
            Verdict::Revoked | Verdict::VersionStale => return Err(Denial::Unauthenticated),
        }

        if policy.superadmin_only && !user.is_superadmin {
            return Err(Denial::Forbidden(ForbiddenReason::SuperadminOnly));
        }

        let tenant = match policy.tenant_id {
            Some(tenant_id) => Some(self.resolve_tenant(&user, tenant_id, credentials).await?),
            None => None,
        };

        if policy.tenant_admin {
            if let Some(TenantContext::Member(tenant_id)) = tenant {
                self.require_tenant_admin(&user, tenant_id).await?;
            }
        }

        let step_up = if policy.recent_step_up {
            let assertion = self
                .recent_assertion(user.user_id, policy.scope(), credentials)
                .ok_or_else(|| self.step_up_required(policy.scope()))?;
            Some(assertion)
        } else {
            None
        };

        Ok(AccessGrant {
            user,
            claim: *claim,
            tenant,
            step_up,
        })
    }

    async fn resolve_tenant(
        &self,
        user: &UserSecurityState,
        tenant_id: Uuid,
        credentials: &StepUpCredentials,
    ) -> Result<TenantContext, Denial> {
        let member = self
            .users
            .is_tenant_member(tenant_id, user.user_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Membership lookup failed");
                Denial::Unavailable
            })?;
        if member {
            return Ok(TenantContext::Member(tenant_id));
        }

        let impersonating = user.is_superadmin
            && credentials
                .impersonation_token
                .as_deref()
                .and_then(|token| self.impersonation.active_tenant(user.user_id, token))
                == Some(tenant_id);
        if impersonating {
            return Ok(TenantContext::Impersonating(tenant_id));
        }

        tracing::warn!(tenant_id = %tenant_id, "Access to tenant outside membership");
        Err(Denial::Forbidden(ForbiddenReason::NotTenantMember))
    }

    async fn require_tenant_admin(
        &self,
        user: &UserSecurityState,
        tenant_id: Uuid,
    ) -> Result<(), Denial> {
        let admin = self
            .users
            .is_tenant_admin(tenant_id, user.user_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Role lookup failed");
                Denial::Unavailable
            })?;
        if admin {
            return Ok(());
        }

        tracing::warn!(tenant_id = %tenant_id, "Tenant admin action by non-admin member");
        Err(Denial::Forbidden(ForbiddenReason::NotTenantAdmin))
    }

    /// A presented assertion that covers `scope` and is recent enough.
    fn recent_assertion(
        &self,
        user_id: Uuid,
        scope: Scope,
        credentials: &StepUpCredentials,
    ) -> Option<StepUpAssertion> {
        let candidates = match scope {
            Scope::Tenant(_) => [
                credentials.tenant_token.as_deref(),
                credentials.global_token.as_deref(),
            ],
            Scope::Global => [credentials.global_token.as_deref(), None],
        };

        candidates
            .into_iter()
            .flatten()
            .filter_map(|token| {
                self.step_up
                    .verify_for(token, user_id, scope, self.accept_global)
            })
            .find(|assertion| assertion.is_recent(self.recent_window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionRecord, TenantPolicy};
    use crate::services::alerts::AlertEngine;
    use crate::services::audit::AuditService;
    use crate::services::step_up::{PURPOSE_IMPERSONATION, PURPOSE_STEP_UP};
    use crate::services::store::MemoryStore;
    use chrono::Utc;
    use secrecy::SecretString;

    struct Fixture {
        store: Arc<MemoryStore>,
        access: AccessOrchestrator,
        codec: StepUpCodec,
        impersonation: ImpersonationService,
        tenant: Uuid,
    }

    fn fixture(accept_global: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        store.insert_tenant(TenantPolicy {
            tenant_id: tenant,
            security_alerts_enabled: false,
        });

        let secret = SecretString::new("secret".to_string());
        let codec = StepUpCodec::new(secret.clone(), PURPOSE_STEP_UP).unwrap();
        let audit = AuditService::new(
            store.clone(),
            AlertEngine::new(store.clone(), store.clone()),
        );
        let impersonation = ImpersonationService::new(
            StepUpCodec::new(secret, PURPOSE_IMPERSONATION).unwrap(),
            store.clone(),
            store.clone(),
            audit,
            Duration::minutes(60),
        );
        let access = AccessOrchestrator::new(
            store.clone(),
            SessionGuard::new(store.clone(), store.clone()),
            codec.clone(),
            impersonation.clone(),
            Duration::minutes(5),
            accept_global,
            "/auth/step-up",
        );

        Fixture {
            store,
            access,
            codec,
            impersonation,
            tenant,
        }
    }

    fn login(f: &Fixture, member: bool, requires_step_up: bool) -> SessionClaim {
        let user = UserSecurityState::new(Uuid::new_v4());
        let session = SessionRecord::new(user.user_id, None, requires_step_up);
        let claim = SessionClaim::for_session(&session, user.session_version);
        if member {
            f.store.add_member(f.tenant, user.user_id);
        }
        f.store.insert_user(user);
        f.store.insert_session(session);
        claim
    }

    fn global_cookie(token: String) -> StepUpCredentials {
        StepUpCredentials {
            global_token: Some(token),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_member_passes_tenant_policy() {
        let f = fixture(true);
        let claim = login(&f, true, false);

        let grant = f
            .access
            .authorize(&claim, AccessPolicy::tenant(f.tenant), &StepUpCredentials::default())
            .await
            .unwrap();
        assert_eq!(grant.tenant, Some(TenantContext::Member(f.tenant)));
    }

    #[tokio::test]
    async fn test_sensitive_action_without_token_challenges() {
        let f = fixture(true);
        let claim = login(&f, true, false);

        let denial = f
            .access
            .authorize(
                &claim,
                AccessPolicy::tenant_sensitive(f.tenant),
                &StepUpCredentials::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            denial,
            Denial::StepUpRequired {
                redirect_to: format!("/auth/step-up?scope=tenant:{}", f.tenant)
            }
        );
    }

    #[tokio::test]
    async fn test_valid_but_stale_token_challenges() {
        let f = fixture(true);
        let claim = login(&f, false, false);
        let issued = Utc::now().timestamp_millis() - 6 * 60 * 1000;
        let token = f
            .codec
            .sign_at(claim.user_id, Scope::Global, Duration::hours(12), issued)
            .unwrap();

        let denial = f
            .access
            .authorize(&claim, AccessPolicy::account_sensitive(), &global_cookie(token))
            .await
            .unwrap_err();
        assert!(matches!(denial, Denial::StepUpRequired { .. }));
    }

    #[tokio::test]
    async fn test_global_token_covers_tenant_only_when_accepted() {
        for (accept_global, allowed) in [(true, true), (false, false)] {
            let f = fixture(accept_global);
            let claim = login(&f, true, false);
            let token = f
                .codec
                .sign(claim.user_id, Scope::Global, Duration::hours(12))
                .unwrap();

            let result = f
                .access
                .authorize(
                    &claim,
                    AccessPolicy::tenant_sensitive(f.tenant),
                    &global_cookie(token),
                )
                .await;
            assert_eq!(result.is_ok(), allowed);
        }
    }

    #[tokio::test]
    async fn test_tenant_token_never_covers_account_actions() {
        let f = fixture(true);
        let claim = login(&f, true, false);
        let token = f
            .codec
            .sign(claim.user_id, Scope::Tenant(f.tenant), Duration::hours(12))
            .unwrap();

        let credentials = StepUpCredentials {
            tenant_token: Some(token.clone()),
            global_token: Some(token),
            ..Default::default()
        };
        let denial = f
            .access
            .authorize(&claim, AccessPolicy::account_sensitive(), &credentials)
            .await
            .unwrap_err();
        assert!(matches!(denial, Denial::StepUpRequired { .. }));
    }

    #[tokio::test]
    async fn test_another_users_token_is_ignored() {
        let f = fixture(true);
        let claim = login(&f, true, false);
        let token = f
            .codec
            .sign(Uuid::new_v4(), Scope::Global, Duration::hours(12))
            .unwrap();

        let result = f
            .access
            .authorize(&claim, AccessPolicy::account_sensitive(), &global_cookie(token))
            .await;
        assert!(matches!(result, Err(Denial::StepUpRequired { .. })));
    }

    #[tokio::test]
    async fn test_password_change_checked_before_session() {
        let f = fixture(true);
        let claim = login(&f, true, false);
        let mut user = f.store.user(claim.user_id).unwrap();
        user.must_change_password = true;
        user.session_version += 1;
        f.store.insert_user(user);

        let denial = f
            .access
            .authorize(&claim, AccessPolicy::tenant(f.tenant), &StepUpCredentials::default())
            .await
            .unwrap_err();
        assert_eq!(
            denial,
            Denial::Forbidden(ForbiddenReason::PasswordChangeRequired)
        );

        // Account routes are not blocked; the stale version is what stops them.
        let denial = f
            .access
            .authorize(&claim, AccessPolicy::account(), &StepUpCredentials::default())
            .await
            .unwrap_err();
        assert_eq!(denial, Denial::Unauthenticated);
    }

    #[tokio::test]
    async fn test_session_flag_maps_to_step_up_not_logout() {
        let f = fixture(true);
        let claim = login(&f, true, true);

        let denial = f
            .access
            .authorize(&claim, AccessPolicy::account(), &StepUpCredentials::default())
            .await
            .unwrap_err();
        assert!(matches!(denial, Denial::StepUpRequired { .. }));

        assert!(f
            .access
            .authorize(&claim, AccessPolicy::session(), &StepUpCredentials::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_non_member_needs_impersonation() {
        let f = fixture(true);
        let claim = login(&f, false, false);

        let denial = f
            .access
            .authorize(&claim, AccessPolicy::tenant(f.tenant), &StepUpCredentials::default())
            .await
            .unwrap_err();
        assert_eq!(denial, Denial::Forbidden(ForbiddenReason::NotTenantMember));

        let mut admin = f.store.user(claim.user_id).unwrap();
        admin.is_superadmin = true;
        f.store.insert_user(admin);
        let indicator = f.impersonation.enter(claim.user_id, f.tenant).await.unwrap();

        let grant = f
            .access
            .authorize(
                &claim,
                AccessPolicy::tenant(f.tenant),
                &StepUpCredentials {
                    impersonation_token: Some(indicator),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(grant.tenant, Some(TenantContext::Impersonating(f.tenant)));
    }

    #[tokio::test]
    async fn test_admin_policy_needs_admin_role() {
        let f = fixture(true);
        let member = login(&f, true, false);
        let admin = login(&f, true, false);
        f.store.add_admin(f.tenant, admin.user_id);

        let tenant_cookie = |claim: &SessionClaim| StepUpCredentials {
            tenant_token: Some(
                f.codec
                    .sign(claim.user_id, Scope::Tenant(f.tenant), Duration::hours(12))
                    .unwrap(),
            ),
            ..Default::default()
        };

        let denial = f
            .access
            .authorize(&member, AccessPolicy::tenant_admin(f.tenant), &tenant_cookie(&member))
            .await
            .unwrap_err();
        assert_eq!(denial, Denial::Forbidden(ForbiddenReason::NotTenantAdmin));

        let grant = f
            .access
            .authorize(&admin, AccessPolicy::tenant_admin(f.tenant), &tenant_cookie(&admin))
            .await
            .unwrap();
        assert_eq!(grant.tenant, Some(TenantContext::Member(f.tenant)));
    }

    #[tokio::test]
    async fn test_impersonating_superadmin_passes_admin_policy() {
        let f = fixture(true);
        let claim = login(&f, false, false);
        let mut user = f.store.user(claim.user_id).unwrap();
        user.is_superadmin = true;
        f.store.insert_user(user);
        let indicator = f.impersonation.enter(claim.user_id, f.tenant).await.unwrap();

        let credentials = StepUpCredentials {
            global_token: Some(
                f.codec
                    .sign(claim.user_id, Scope::Global, Duration::hours(12))
                    .unwrap(),
            ),
            impersonation_token: Some(indicator),
            ..Default::default()
        };
        let grant = f
            .access
            .authorize(&claim, AccessPolicy::tenant_admin(f.tenant), &credentials)
            .await
            .unwrap();
        assert_eq!(grant.tenant, Some(TenantContext::Impersonating(f.tenant)));
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let f = fixture(true);
        let claim = login(&f, true, false);
        f.store.set_unavailable(true);

        let denial = f
            .access
            .authorize(&claim, AccessPolicy::account(), &StepUpCredentials::default())
            .await
            .unwrap_err();
        assert_eq!(denial, Denial::Unavailable);
    }

    #[test]
    fn test_denials_map_to_distinct_statuses() {
        use axum::response::IntoResponse;
        let status = |d: Denial| AppError::from(d).into_response().status().as_u16();

        assert_eq!(status(Denial::Unauthenticated), 401);
        assert_eq!(
            status(Denial::StepUpRequired {
                redirect_to: "/auth/step-up?scope=global".into()
            }),
            428
        );
        assert_eq!(status(Denial::Forbidden(ForbiddenReason::SuperadminOnly)), 403);
        assert_eq!(status(Denial::Unavailable), 503);
    }
}
