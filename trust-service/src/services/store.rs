//! Persistence seams for the trust boundary.
//!
//! The relational store owns users, sessions, tenants and the audit log. The
//! services here only see these traits; `Database` implements them over
//! Postgres and `MemoryStore` in process.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::error::ServiceError;
use crate::models::{
    AuditEvent, SecurityAlert, SessionRecord, StoredRecoveryCode, TenantPolicy, TrustedDevice,
    UserSecurityState,
};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserSecurityState>, ServiceError>;

    async fn is_tenant_member(&self, tenant_id: Uuid, user_id: Uuid)
        -> Result<bool, ServiceError>;

    async fn is_tenant_admin(&self, tenant_id: Uuid, user_id: Uuid)
        -> Result<bool, ServiceError>;

    /// Every tenant the user belongs to.
    async fn tenant_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, ServiceError>;

    /// Increment the session version and return the new value.
    async fn bump_session_version(&self, user_id: Uuid) -> Result<i64, ServiceError>;

    /// Store a secret awaiting confirmation. Leaves the factor disabled.
    async fn store_second_factor_secret(
        &self,
        user_id: Uuid,
        secret: &str,
    ) -> Result<(), ServiceError>;

    async fn enable_second_factor(&self, user_id: Uuid) -> Result<(), ServiceError>;

    /// Remove the secret and every recovery code.
    async fn disable_second_factor(&self, user_id: Uuid) -> Result<(), ServiceError>;

    async fn replace_recovery_codes(
        &self,
        user_id: Uuid,
        codes: &[StoredRecoveryCode],
    ) -> Result<(), ServiceError>;

    /// Write `updated` only if the stored list still equals `expected`.
    /// Returns whether the write happened.
    async fn swap_recovery_codes(
        &self,
        user_id: Uuid,
        expected: &[StoredRecoveryCode],
        updated: &[StoredRecoveryCode],
    ) -> Result<bool, ServiceError>;

    /// Record `step` as the last accepted TOTP time step, only if it is newer
    /// than the one on file. Returns whether it was recorded.
    async fn record_totp_step(&self, user_id: Uuid, step: i64) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>, ServiceError>;

    /// Returns false if the session is missing or already revoked.
    async fn revoke_session(
        &self,
        session_id: Uuid,
        revoked_by: Uuid,
        reason: &str,
    ) -> Result<bool, ServiceError>;

    /// Revoke every live session of `user_id`, returning how many changed.
    async fn revoke_all_sessions(
        &self,
        user_id: Uuid,
        revoked_by: Uuid,
        reason: &str,
    ) -> Result<u64, ServiceError>;

    async fn clear_step_up(&self, session_id: Uuid) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait TrustedDeviceStore: Send + Sync {
    /// Approve a new device or refresh an existing one, clearing any revocation.
    async fn approve_device(&self, device: &TrustedDevice) -> Result<(), ServiceError>;

    async fn revoke_device(&self, user_id: Uuid, device_hash: &str) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait TenantPolicyStore: Send + Sync {
    async fn find_tenant_policy(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantPolicy>, ServiceError>;
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, UserSecurityState>,
    memberships: HashSet<(Uuid, Uuid)>,
    admins: HashSet<(Uuid, Uuid)>,
    sessions: HashMap<Uuid, SessionRecord>,
    devices: HashMap<(Uuid, String), TrustedDevice>,
    tenants: HashMap<Uuid, TenantPolicy>,
    audit_events: Vec<AuditEvent>,
    alerts: Vec<SecurityAlert>,
}

/// In-process store. One lock guards all state, so conditional updates are
/// atomic with respect to each other.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    fail_alert_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<MutexGuard<'_, MemoryState>, ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Store("store unavailable".to_string()));
        }
        Ok(self.locked())
    }

    /// Make every store call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_fail_alert_writes(&self, fail: bool) {
        self.fail_alert_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert_user(&self, user: UserSecurityState) {
        self.locked().users.insert(user.user_id, user);
    }

    pub fn add_member(&self, tenant_id: Uuid, user_id: Uuid) {
        self.locked().memberships.insert((tenant_id, user_id));
    }

    /// Add a member holding the tenant admin role.
    pub fn add_admin(&self, tenant_id: Uuid, user_id: Uuid) {
        let mut state = self.locked();
        state.memberships.insert((tenant_id, user_id));
        state.admins.insert((tenant_id, user_id));
    }

    pub fn insert_session(&self, session: SessionRecord) {
        self.locked().sessions.insert(session.session_id, session);
    }

    pub fn insert_tenant(&self, policy: TenantPolicy) {
        self.locked().tenants.insert(policy.tenant_id, policy);
    }

    pub fn user(&self, user_id: Uuid) -> Option<UserSecurityState> {
        self.locked().users.get(&user_id).cloned()
    }

    pub fn session(&self, session_id: Uuid) -> Option<SessionRecord> {
        self.locked().sessions.get(&session_id).cloned()
    }

    pub fn device(&self, user_id: Uuid, device_hash: &str) -> Option<TrustedDevice> {
        self.locked()
            .devices
            .get(&(user_id, device_hash.to_string()))
            .cloned()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.locked().audit_events.clone()
    }

    pub fn alerts(&self) -> Vec<SecurityAlert> {
        self.locked().alerts.clone()
    }
}

fn user_mut(state: &mut MemoryState, user_id: Uuid) -> Result<&mut UserSecurityState, ServiceError> {
    state
        .users
        .get_mut(&user_id)
        .ok_or(ServiceError::UserNotFound)
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserSecurityState>, ServiceError> {
        Ok(self.available()?.users.get(&user_id).cloned())
    }

    async fn is_tenant_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(self.available()?.memberships.contains(&(tenant_id, user_id)))
    }

    async fn is_tenant_admin(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(self.available()?.admins.contains(&(tenant_id, user_id)))
    }

    async fn tenant_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let mut tenants: Vec<Uuid> = self
            .available()?
            .memberships
            .iter()
            .filter(|(_, member)| *member == user_id)
            .map(|(tenant, _)| *tenant)
            .collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn bump_session_version(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        let mut state = self.available()?;
        let user = user_mut(&mut state, user_id)?;
        user.session_version += 1;
        Ok(user.session_version)
    }

    async fn store_second_factor_secret(
        &self,
        user_id: Uuid,
        secret: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.available()?;
        let user = user_mut(&mut state, user_id)?;
        user.second_factor_secret = Some(secret.to_string());
        user.second_factor_enabled = false;
        user.second_factor_enabled_at = None;
        Ok(())
    }

    async fn enable_second_factor(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.available()?;
        let user = user_mut(&mut state, user_id)?;
        user.second_factor_enabled = true;
        user.second_factor_enabled_at = Some(Utc::now());
        Ok(())
    }

    async fn disable_second_factor(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.available()?;
        let user = user_mut(&mut state, user_id)?;
        user.second_factor_secret = None;
        user.second_factor_enabled = false;
        user.second_factor_enabled_at = None;
        user.recovery_codes.clear();
        user.last_totp_step = None;
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        user_id: Uuid,
        codes: &[StoredRecoveryCode],
    ) -> Result<(), ServiceError> {
        let mut state = self.available()?;
        user_mut(&mut state, user_id)?.recovery_codes = codes.to_vec();
        Ok(())
    }

    async fn swap_recovery_codes(
        &self,
        user_id: Uuid,
        expected: &[StoredRecoveryCode],
        updated: &[StoredRecoveryCode],
    ) -> Result<bool, ServiceError> {
        let mut state = self.available()?;
        let user = user_mut(&mut state, user_id)?;
        if user.recovery_codes != expected {
            return Ok(false);
        }
        user.recovery_codes = updated.to_vec();
        Ok(true)
    }

    async fn record_totp_step(&self, user_id: Uuid, step: i64) -> Result<bool, ServiceError> {
        let mut state = self.available()?;
        let user = user_mut(&mut state, user_id)?;
        if user.last_totp_step.is_some_and(|last| last >= step) {
            return Ok(false);
        }
        user.last_totp_step = Some(step);
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>, ServiceError> {
        Ok(self.available()?.sessions.get(&session_id).cloned())
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        revoked_by: Uuid,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let mut state = self.available()?;
        match state.sessions.get_mut(&session_id) {
            Some(session) if session.is_live() => {
                session.revoked_at = Some(Utc::now());
                session.revoked_by_user_id = Some(revoked_by);
                session.revoked_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_sessions(
        &self,
        user_id: Uuid,
        revoked_by: Uuid,
        reason: &str,
    ) -> Result<u64, ServiceError> {
        let mut state = self.available()?;
        let now = Utc::now();
        let mut revoked = 0;
        for session in state
            .sessions
            .values_mut()
            .filter(|s| s.user_id == user_id && s.is_live())
        {
            session.revoked_at = Some(now);
            session.revoked_by_user_id = Some(revoked_by);
            session.revoked_reason = Some(reason.to_string());
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn clear_step_up(&self, session_id: Uuid) -> Result<(), ServiceError> {
        let mut state = self.available()?;
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(ServiceError::SessionNotFound)?;
        session.requires_step_up = false;
        session.last_seen_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TrustedDeviceStore for MemoryStore {
    async fn approve_device(&self, device: &TrustedDevice) -> Result<(), ServiceError> {
        let mut state = self.available()?;
        let key = (device.user_id, device.device_hash.clone());
        match state.devices.get_mut(&key) {
            Some(existing) => {
                if !existing.is_trusted() {
                    existing.approved_at = device.approved_at;
                }
                existing.revoked_at = None;
                existing.last_seen_at = device.last_seen_at;
                if device.label.is_some() {
                    existing.label = device.label.clone();
                }
            }
            None => {
                state.devices.insert(key, device.clone());
            }
        }
        Ok(())
    }

    async fn revoke_device(&self, user_id: Uuid, device_hash: &str) -> Result<bool, ServiceError> {
        let mut state = self.available()?;
        match state.devices.get_mut(&(user_id, device_hash.to_string())) {
            Some(device) if device.is_trusted() => {
                device.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<(), ServiceError> {
        self.available()?.audit_events.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), ServiceError> {
        if self.fail_alert_writes.load(Ordering::SeqCst) {
            return Err(ServiceError::Store("alert write rejected".to_string()));
        }
        self.available()?.alerts.push(alert.clone());
        Ok(())
    }
}

#[async_trait]
impl TenantPolicyStore for MemoryStore {
    async fn find_tenant_policy(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantPolicy>, ServiceError> {
        Ok(self.available()?.tenants.get(&tenant_id).cloned())
    }
}
