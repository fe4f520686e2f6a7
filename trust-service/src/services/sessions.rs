//! Session and device revocation.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::audit::AuditService;
use super::error::ServiceError;
use super::store::{SessionStore, TrustedDeviceStore, UserStore};
use crate::models::{actions, AuditEvent};

#[derive(Debug, Clone, Serialize)]
pub struct SignOutSummary {
    pub session_version: i64,
    pub sessions_revoked: u64,
}

#[derive(Clone)]
pub struct SessionService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    devices: Arc<dyn TrustedDeviceStore>,
    audit: AuditService,
}

impl SessionService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        devices: Arc<dyn TrustedDeviceStore>,
        audit: AuditService,
    ) -> Self {
        Self {
            users,
            sessions,
            devices,
            audit,
        }
    }

    /// Revoke one of the actor's own sessions. Sessions of other users look
    /// the same as missing ones.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_session(
        &self,
        actor_id: Uuid,
        session_id: Uuid,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let session = self
            .sessions
            .find_session(session_id)
            .await?
            .filter(|s| s.user_id == actor_id)
            .ok_or(ServiceError::SessionNotFound)?;

        let revoked = self
            .sessions
            .revoke_session(session.session_id, actor_id, reason)
            .await?;

        if revoked {
            self.audit
                .record_best_effort(
                    AuditEvent::new(actions::SESSION_REVOKED)
                        .actor(actor_id)
                        .target("session", session_id)
                        .meta(serde_json::json!({ "reason": reason })),
                )
                .await;
        }
        Ok(revoked)
    }

    /// Kill every session of `user_id` at once: bump the session version so
    /// outstanding claims go stale, then mark each session revoked.
    #[tracing::instrument(skip(self))]
    pub async fn sign_out_everywhere(
        &self,
        actor_id: Uuid,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
        reason: &str,
    ) -> Result<SignOutSummary, ServiceError> {
        let session_version = self.users.bump_session_version(user_id).await?;
        let sessions_revoked = self
            .sessions
            .revoke_all_sessions(user_id, actor_id, reason)
            .await?;

        self.audit
            .record(
                AuditEvent::new(actions::SESSIONS_REVOKED_ALL)
                    .tenant(tenant_id)
                    .actor(actor_id)
                    .target("user", user_id)
                    .meta(serde_json::json!({
                        "reason": reason,
                        "sessions_revoked": sessions_revoked,
                    })),
            )
            .await?;

        tracing::info!(session_version, sessions_revoked, "Signed out everywhere");
        Ok(SignOutSummary {
            session_version,
            sessions_revoked,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn revoke_device(&self, user_id: Uuid, device_hash: &str) -> Result<bool, ServiceError> {
        let revoked = self.devices.revoke_device(user_id, device_hash).await?;
        if revoked {
            self.audit
                .record_best_effort(
                    AuditEvent::new(actions::DEVICE_REVOKED)
                        .actor(user_id)
                        .meta(serde_json::json!({ "device_hash": device_hash })),
                )
                .await;
        }
        Ok(revoked)
    }
}
