//! Second-factor lifecycle: enrollment, step-up verification, recovery code
//! regeneration and administrative reset.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::audit::AuditService;
use super::error::ServiceError;
use super::recovery::RecoveryVault;
use super::second_factor::{Provisioned, SecondFactorVerifier};
use super::step_up::{Scope, StepUpCodec};
use super::store::{SessionStore, TrustedDeviceStore, UserStore};
use crate::models::{actions, AuditEvent, SessionClaim, TrustedDevice, UserSecurityState};

#[derive(Debug, Clone)]
pub enum PresentedCode {
    Totp(String),
    Recovery(String),
}

#[derive(Debug, Clone)]
pub struct StepUpRequest {
    pub claim: SessionClaim,
    pub scope: Scope,
    pub code: PresentedCode,
    pub device_hash: Option<String>,
    pub device_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StepUpIssued {
    pub token: String,
    pub scope: Scope,
    pub ttl: Duration,
    pub used_recovery_code: bool,
    pub remaining_recovery_codes: usize,
}

#[derive(Clone)]
pub struct MfaService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    devices: Arc<dyn TrustedDeviceStore>,
    audit: AuditService,
    vault: RecoveryVault,
    verifier: Arc<dyn SecondFactorVerifier>,
    codec: StepUpCodec,
    step_up_ttl: Duration,
    recovery_code_count: usize,
}

impl MfaService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        devices: Arc<dyn TrustedDeviceStore>,
        audit: AuditService,
        vault: RecoveryVault,
        verifier: Arc<dyn SecondFactorVerifier>,
        codec: StepUpCodec,
        step_up_ttl: Duration,
        recovery_code_count: usize,
    ) -> Self {
        Self {
            users,
            sessions,
            devices,
            audit,
            vault,
            verifier,
            codec,
            step_up_ttl,
            recovery_code_count,
        }
    }

    async fn load_user(&self, user_id: Uuid) -> Result<UserSecurityState, ServiceError> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    /// Tenants a user-level event is recorded against: the acting tenant if
    /// there is one, otherwise every tenant the user belongs to. A user with
    /// no memberships gets a single unattributed event.
    async fn event_tenants(&self, user_id: Uuid, tenant_id: Option<Uuid>) -> Vec<Option<Uuid>> {
        if tenant_id.is_some() {
            return vec![tenant_id];
        }
        match self.users.tenant_memberships(user_id).await {
            Ok(tenants) if !tenants.is_empty() => tenants.into_iter().map(Some).collect(),
            Ok(_) => vec![None],
            Err(e) => {
                tracing::warn!(error = %e, "Membership lookup failed, event left unattributed");
                vec![None]
            }
        }
    }

    async fn record_for_user(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        event: impl Fn(Option<Uuid>) -> AuditEvent,
    ) {
        for tenant in self.event_tenants(user_id, tenant_id).await {
            self.audit.record_best_effort(event(tenant)).await;
        }
    }

    /// Accept a verified TOTP step only if it is newer than the last one used.
    async fn accept_totp_step(&self, user_id: Uuid, step: i64) -> Result<bool, ServiceError> {
        let fresh = self.users.record_totp_step(user_id, step).await?;
        if !fresh {
            tracing::warn!(step, "TOTP code from an already used time step");
        }
        Ok(fresh)
    }

    /// Provision a secret for a user without a second factor.
    #[tracing::instrument(skip(self, account))]
    pub async fn begin_enrollment(
        &self,
        user_id: Uuid,
        account: &str,
    ) -> Result<Provisioned, ServiceError> {
        let user = self.load_user(user_id).await?;
        if user.second_factor_enabled {
            return Err(ServiceError::ValidationError(
                "Second factor already enabled".to_string(),
            ));
        }

        let provisioned = self.verifier.provision(account)?;
        self.users
            .store_second_factor_secret(user_id, &provisioned.secret)
            .await?;
        Ok(provisioned)
    }

    /// Confirm the pending secret with a first code. Returns the initial
    /// recovery codes, shown once.
    #[tracing::instrument(skip(self, code))]
    pub async fn confirm_enrollment(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        code: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let user = self.load_user(user_id).await?;
        if user.second_factor_enabled {
            return Err(ServiceError::ValidationError(
                "Second factor already enabled".to_string(),
            ));
        }
        let Some(secret) = user.second_factor_secret.as_deref() else {
            return Err(ServiceError::SecondFactorNotEnabled);
        };
        let Some(step) = self.verifier.verify(secret, code) else {
            return Err(ServiceError::InvalidCode);
        };
        if !self.accept_totp_step(user_id, step).await? {
            return Err(ServiceError::InvalidCode);
        }

        let codes = RecoveryVault::generate(self.recovery_code_count);
        let stored = self.vault.prepare(&codes, user_id)?;
        self.users.replace_recovery_codes(user_id, &stored).await?;
        self.users.enable_second_factor(user_id).await?;

        self.record_for_user(user_id, tenant_id, |tenant| {
            AuditEvent::new(actions::MFA_ENROLLED)
                .tenant(tenant)
                .actor(user_id)
                .target("user", user_id)
        })
        .await;

        Ok(codes)
    }

    /// Prove the second factor again and receive a step-up token for
    /// `request.scope`. Clears the session's step-up flag and refreshes the
    /// device's trust record. Never bypassed by a trusted device.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.claim.user_id, scope = %request.scope)
    )]
    pub async fn verify_step_up(&self, request: StepUpRequest) -> Result<StepUpIssued, ServiceError> {
        let user_id = request.claim.user_id;
        let user = self.load_user(user_id).await?;
        if !user.has_second_factor() {
            return Err(ServiceError::SecondFactorNotEnabled);
        }

        let (verified, remaining) = match &request.code {
            PresentedCode::Totp(code) => {
                let secret = user.second_factor_secret.as_deref().unwrap_or_default();
                let fresh = match self.verifier.verify(secret, code) {
                    Some(step) => self.accept_totp_step(user_id, step).await?,
                    None => false,
                };
                (fresh, user.unused_recovery_codes())
            }
            PresentedCode::Recovery(code) => self.consume_recovery_code(user, code).await?,
        };

        if !verified {
            tracing::warn!("Step-up verification failed");
            self.record_for_user(user_id, request.scope.tenant_id(), |tenant| {
                AuditEvent::new(actions::MFA_VERIFY_FAILED)
                    .tenant(tenant)
                    .actor(user_id)
                    .target("user", user_id)
            })
            .await;
            return Err(ServiceError::InvalidCode);
        }

        self.sessions.clear_step_up(request.claim.session_id).await?;

        if let Some(device_hash) = request.device_hash.clone() {
            let device = TrustedDevice::new(user_id, device_hash, request.device_label.clone());
            if let Err(e) = self.devices.approve_device(&device).await {
                tracing::warn!(error = %e, "Failed to refresh trusted device");
            }
        }

        let used_recovery_code = matches!(request.code, PresentedCode::Recovery(_));
        if used_recovery_code {
            self.record_for_user(user_id, request.scope.tenant_id(), |tenant| {
                AuditEvent::new(actions::MFA_RECOVERY_USED)
                    .tenant(tenant)
                    .actor(user_id)
                    .target("user", user_id)
                    .meta(serde_json::json!({ "remaining": remaining }))
            })
            .await;
        }

        let token = self.codec.sign(user_id, request.scope, self.step_up_ttl)?;
        tracing::info!(used_recovery_code, "Step-up verified");

        Ok(StepUpIssued {
            token,
            scope: request.scope,
            ttl: self.step_up_ttl,
            used_recovery_code,
            remaining_recovery_codes: remaining,
        })
    }

    /// Spend one recovery code with a conditional write against the snapshot
    /// it was checked on. A lost race re-reads and re-checks, so a code that
    /// another request just spent fails here. A lost swap always follows
    /// another writer's update, so retries continue until the snapshot holds.
    async fn consume_recovery_code(
        &self,
        mut user: UserSecurityState,
        code: &str,
    ) -> Result<(bool, usize), ServiceError> {
        loop {
            let outcome = self.vault.consume(&user.recovery_codes, user.user_id, code)?;
            if !outcome.ok {
                return Ok((false, user.unused_recovery_codes()));
            }

            let swapped = self
                .users
                .swap_recovery_codes(user.user_id, &user.recovery_codes, &outcome.updated)
                .await?;
            if swapped {
                let remaining = outcome.updated.iter().filter(|c| !c.is_used()).count();
                return Ok((true, remaining));
            }

            tracing::debug!("Recovery code list changed underneath us, retrying");
            user = self.load_user(user.user_id).await?;
        }
    }

    /// Replace every recovery code. Old codes stop working immediately.
    #[tracing::instrument(skip(self))]
    pub async fn regenerate_recovery_codes(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<String>, ServiceError> {
        let user = self.load_user(user_id).await?;
        if !user.has_second_factor() {
            return Err(ServiceError::SecondFactorNotEnabled);
        }

        let codes = RecoveryVault::generate(self.recovery_code_count);
        let stored = self.vault.prepare(&codes, user_id)?;
        self.users.replace_recovery_codes(user_id, &stored).await?;

        for tenant in self.event_tenants(user_id, None).await {
            self.audit
                .record(
                    AuditEvent::new(actions::MFA_RECOVERY_GENERATED)
                        .tenant(tenant)
                        .actor(user_id)
                        .target("user", user_id)
                        .meta(serde_json::json!({ "count": codes.len() })),
                )
                .await?;
        }

        Ok(codes)
    }

    /// Remove another user's second factor on behalf of a tenant admin.
    #[tracing::instrument(skip(self))]
    pub async fn admin_reset(
        &self,
        actor_id: Uuid,
        tenant_id: Uuid,
        target_user_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.load_user(target_user_id).await?;
        if !self.users.is_tenant_member(tenant_id, target_user_id).await? {
            return Err(ServiceError::UserNotFound);
        }

        self.users.disable_second_factor(target_user_id).await?;
        self.audit
            .record(
                AuditEvent::new(actions::MFA_ADMIN_RESET)
                    .tenant(Some(tenant_id))
                    .actor(actor_id)
                    .target("user", target_user_id),
            )
            .await?;

        tracing::info!("Second factor reset by administrator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionRecord, TenantPolicy};
    use crate::services::alerts::AlertEngine;
    use crate::services::step_up::PURPOSE_STEP_UP;
    use crate::services::store::MemoryStore;
    use crate::models::AlertLevel;
    use secrecy::SecretString;

    use std::sync::atomic::{AtomicI64, Ordering};

    const GOOD_CODE: &str = "123456";

    /// Accepts [`GOOD_CODE`]. Each accepted code comes from a later time step
    /// unless `advance` is off, in which case every code shares one step.
    struct FixedVerifier {
        step: AtomicI64,
        advance: bool,
    }

    impl FixedVerifier {
        fn advancing() -> Self {
            Self {
                step: AtomicI64::new(1_000),
                advance: true,
            }
        }

        fn single_step() -> Self {
            Self {
                advance: false,
                ..Self::advancing()
            }
        }
    }

    impl SecondFactorVerifier for FixedVerifier {
        fn provision(&self, account: &str) -> anyhow::Result<Provisioned> {
            Ok(Provisioned {
                secret: "JBSWY3DPEHPK3PXP".to_string(),
                otpauth_url: format!("otpauth://totp/Test:{}", account),
            })
        }

        fn verify(&self, _secret: &str, code: &str) -> Option<i64> {
            if code != GOOD_CODE {
                return None;
            }
            if self.advance {
                Some(self.step.fetch_add(1, Ordering::SeqCst) + 1)
            } else {
                Some(self.step.load(Ordering::SeqCst))
            }
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        mfa: MfaService,
        codec: StepUpCodec,
        tenant: Uuid,
    }

    fn fixture() -> Fixture {
        fixture_with(FixedVerifier::advancing())
    }

    fn fixture_with(verifier: FixedVerifier) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        store.insert_tenant(TenantPolicy {
            tenant_id: tenant,
            security_alerts_enabled: true,
        });
        let secret = SecretString::new("secret".to_string());
        let codec = StepUpCodec::new(secret.clone(), PURPOSE_STEP_UP).unwrap();
        let mfa = MfaService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            AuditService::new(store.clone(), AlertEngine::new(store.clone(), store.clone())),
            RecoveryVault::new(secret).unwrap(),
            Arc::new(verifier),
            codec.clone(),
            Duration::hours(12),
            10,
        );
        Fixture {
            store,
            mfa,
            codec,
            tenant,
        }
    }

    async fn enrolled(f: &Fixture) -> (SessionClaim, Vec<String>) {
        let user = UserSecurityState::new(Uuid::new_v4());
        let session = SessionRecord::new(user.user_id, Some("laptop".into()), true);
        let claim = SessionClaim::for_session(&session, user.session_version);
        f.store.add_member(f.tenant, user.user_id);
        f.store.insert_user(user);
        f.store.insert_session(session);

        f.mfa
            .begin_enrollment(claim.user_id, "user@example.com")
            .await
            .unwrap();
        let codes = f
            .mfa
            .confirm_enrollment(claim.user_id, Some(f.tenant), GOOD_CODE)
            .await
            .unwrap();
        (claim, codes)
    }

    fn request(claim: SessionClaim, scope: Scope, code: PresentedCode) -> StepUpRequest {
        StepUpRequest {
            claim,
            scope,
            code,
            device_hash: Some("laptop".into()),
            device_label: Some("Work laptop".into()),
        }
    }

    #[tokio::test]
    async fn test_enrollment_issues_codes() {
        let f = fixture();
        let (claim, codes) = enrolled(&f).await;

        let user = f.store.user(claim.user_id).unwrap();
        assert!(user.has_second_factor());
        assert_eq!(codes.len(), 10);
        assert_eq!(user.unused_recovery_codes(), 10);
    }

    #[tokio::test]
    async fn test_wrong_enrollment_code_is_rejected() {
        let f = fixture();
        let user = UserSecurityState::new(Uuid::new_v4());
        let user_id = user.user_id;
        f.store.insert_user(user);

        f.mfa.begin_enrollment(user_id, "u").await.unwrap();
        assert!(matches!(
            f.mfa.confirm_enrollment(user_id, None, "000000").await,
            Err(ServiceError::InvalidCode)
        ));
        assert!(!f.store.user(user_id).unwrap().second_factor_enabled);
    }

    #[tokio::test]
    async fn test_totp_step_up_clears_flag_and_trusts_device() {
        let f = fixture();
        let (claim, _) = enrolled(&f).await;

        let issued = f
            .mfa
            .verify_step_up(request(
                claim,
                Scope::Tenant(f.tenant),
                PresentedCode::Totp(GOOD_CODE.into()),
            ))
            .await
            .unwrap();

        let assertion = f.codec.verify(&issued.token).unwrap();
        assert_eq!(assertion.scope, Scope::Tenant(f.tenant));
        assert_eq!(assertion.subject_id, claim.user_id);
        assert!(!f.store.session(claim.session_id).unwrap().requires_step_up);
        assert!(f.store.device(claim.user_id, "laptop").unwrap().is_trusted());
    }

    #[tokio::test]
    async fn test_failed_step_up_is_audited_and_generic() {
        let f = fixture();
        let (claim, _) = enrolled(&f).await;

        let result = f
            .mfa
            .verify_step_up(request(
                claim,
                Scope::Tenant(f.tenant),
                PresentedCode::Totp("999999".into()),
            ))
            .await;

        assert!(matches!(result, Err(ServiceError::InvalidCode)));
        assert!(f.store.session(claim.session_id).unwrap().requires_step_up);
        assert!(f
            .store
            .alerts()
            .iter()
            .any(|a| a.level == AlertLevel::Warn && a.message.contains("verification failed")));
    }

    #[tokio::test]
    async fn test_totp_code_from_used_step_is_rejected() {
        let f = fixture_with(FixedVerifier::single_step());
        // Enrollment already consumed the only step this verifier reports.
        let (claim, _) = enrolled(&f).await;

        let replay = f
            .mfa
            .verify_step_up(request(
                claim,
                Scope::Tenant(f.tenant),
                PresentedCode::Totp(GOOD_CODE.into()),
            ))
            .await;

        assert!(matches!(replay, Err(ServiceError::InvalidCode)));
        assert!(f.store.session(claim.session_id).unwrap().requires_step_up);
        assert!(f
            .store
            .audit_events()
            .iter()
            .any(|e| e.action == actions::MFA_VERIFY_FAILED));
    }

    #[tokio::test]
    async fn test_accepted_totp_step_is_remembered() {
        let f = fixture();
        let (claim, _) = enrolled(&f).await;
        let enrolled_step = f.store.user(claim.user_id).unwrap().last_totp_step;

        f.mfa
            .verify_step_up(request(claim, Scope::Global, PresentedCode::Totp(GOOD_CODE.into())))
            .await
            .unwrap();

        let after = f.store.user(claim.user_id).unwrap().last_totp_step;
        assert!(after > enrolled_step);
    }

    #[tokio::test]
    async fn test_global_recovery_use_alerts_each_tenant() {
        let f = fixture();
        let (claim, codes) = enrolled(&f).await;
        let second = Uuid::new_v4();
        f.store.insert_tenant(TenantPolicy {
            tenant_id: second,
            security_alerts_enabled: true,
        });
        f.store.add_member(second, claim.user_id);

        f.mfa
            .verify_step_up(request(
                claim,
                Scope::Global,
                PresentedCode::Recovery(codes[0].clone()),
            ))
            .await
            .unwrap();

        let mut alerted: Vec<Uuid> = f
            .store
            .alerts()
            .iter()
            .filter(|a| a.level == AlertLevel::Warn && a.message == "Recovery code used")
            .map(|a| a.tenant_id)
            .collect();
        alerted.sort();
        let mut expected = vec![f.tenant, second];
        expected.sort();
        assert_eq!(alerted, expected);
    }

    #[tokio::test]
    async fn test_global_verify_failure_alerts_member_tenant() {
        let f = fixture();
        let (claim, _) = enrolled(&f).await;

        let result = f
            .mfa
            .verify_step_up(request(claim, Scope::Global, PresentedCode::Totp("999999".into())))
            .await;

        assert!(matches!(result, Err(ServiceError::InvalidCode)));
        let failed = f
            .store
            .audit_events()
            .into_iter()
            .find(|e| e.action == actions::MFA_VERIFY_FAILED)
            .unwrap();
        assert_eq!(failed.tenant_id, Some(f.tenant));
        assert!(f
            .store
            .alerts()
            .iter()
            .any(|a| a.tenant_id == f.tenant && a.message.contains("verification failed")));
    }

    #[tokio::test]
    async fn test_event_without_memberships_stays_unattributed() {
        let f = fixture();
        let user = UserSecurityState::new(Uuid::new_v4());
        let user_id = user.user_id;
        f.store.insert_user(user);

        f.mfa.begin_enrollment(user_id, "solo").await.unwrap();
        f.mfa.confirm_enrollment(user_id, None, GOOD_CODE).await.unwrap();

        let enrolled: Vec<_> = f
            .store
            .audit_events()
            .into_iter()
            .filter(|e| e.action == actions::MFA_ENROLLED)
            .collect();
        assert_eq!(enrolled.len(), 1);
        assert_eq!(enrolled[0].tenant_id, None);
        assert!(f.store.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_code_works_once() {
        let f = fixture();
        let (claim, codes) = enrolled(&f).await;

        let first = f
            .mfa
            .verify_step_up(request(
                claim,
                Scope::Global,
                PresentedCode::Recovery(codes[0].clone()),
            ))
            .await
            .unwrap();
        assert!(first.used_recovery_code);
        assert_eq!(first.remaining_recovery_codes, 9);

        let again = f
            .mfa
            .verify_step_up(request(
                claim,
                Scope::Global,
                PresentedCode::Recovery(codes[0].clone()),
            ))
            .await;
        assert!(matches!(again, Err(ServiceError::InvalidCode)));
    }

    #[tokio::test]
    async fn test_step_up_needs_enabled_factor() {
        let f = fixture();
        let user = UserSecurityState::new(Uuid::new_v4());
        let session = SessionRecord::new(user.user_id, None, true);
        let claim = SessionClaim::for_session(&session, 1);
        f.store.insert_user(user);
        f.store.insert_session(session);

        let result = f
            .mfa
            .verify_step_up(request(claim, Scope::Global, PresentedCode::Totp(GOOD_CODE.into())))
            .await;
        assert!(matches!(result, Err(ServiceError::SecondFactorNotEnabled)));
    }

    #[tokio::test]
    async fn test_regeneration_invalidates_old_codes() {
        let f = fixture();
        let (claim, old) = enrolled(&f).await;

        let fresh = f.mfa.regenerate_recovery_codes(claim.user_id).await.unwrap();
        assert_eq!(fresh.len(), 10);
        assert!(f.store.alerts().iter().any(|a| a.tenant_id == f.tenant
            && a.level == AlertLevel::Info
            && a.message == "Recovery codes generated"));

        let stale = f
            .mfa
            .verify_step_up(request(claim, Scope::Global, PresentedCode::Recovery(old[0].clone())))
            .await;
        assert!(matches!(stale, Err(ServiceError::InvalidCode)));

        assert!(f
            .mfa
            .verify_step_up(request(claim, Scope::Global, PresentedCode::Recovery(fresh[0].clone())))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_admin_reset_removes_factor_and_raises_high_alert() {
        let f = fixture();
        let (claim, _) = enrolled(&f).await;
        let admin = Uuid::new_v4();

        f.mfa.admin_reset(admin, f.tenant, claim.user_id).await.unwrap();

        let user = f.store.user(claim.user_id).unwrap();
        assert!(!user.has_second_factor());
        assert!(user.recovery_codes.is_empty());
        assert!(f.store.alerts().iter().any(|a| a.level == AlertLevel::High));
    }
}
