//! Superadmin impersonation: a short-lived signed indicator of "acting in
//! tenant X", kept client-side.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::audit::AuditService;
use super::error::ServiceError;
use super::step_up::{Scope, StepUpCodec};
use super::store::{TenantPolicyStore, UserStore};
use crate::models::{actions, AuditEvent};

/// Cookie holding the impersonation indicator.
pub const IMPERSONATION_COOKIE: &str = "trust_impersonation";

#[derive(Clone)]
pub struct ImpersonationService {
    /// Must be built with the impersonation purpose label.
    codec: StepUpCodec,
    users: Arc<dyn UserStore>,
    tenants: Arc<dyn TenantPolicyStore>,
    audit: AuditService,
    ttl: Duration,
}

impl ImpersonationService {
    pub fn new(
        codec: StepUpCodec,
        users: Arc<dyn UserStore>,
        tenants: Arc<dyn TenantPolicyStore>,
        audit: AuditService,
        ttl: Duration,
    ) -> Self {
        Self {
            codec,
            users,
            tenants,
            audit,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint an indicator for `actor_id` acting in `tenant_id`.
    #[tracing::instrument(skip(self))]
    pub async fn enter(&self, actor_id: Uuid, tenant_id: Uuid) -> Result<String, ServiceError> {
        let actor = self
            .users
            .find_user(actor_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        if !actor.is_superadmin {
            return Err(ServiceError::Forbidden(
                "Superadmin access required".to_string(),
            ));
        }
        if self.tenants.find_tenant_policy(tenant_id).await?.is_none() {
            return Err(ServiceError::TenantNotFound);
        }

        let token = self.codec.sign(actor_id, Scope::Tenant(tenant_id), self.ttl)?;

        self.audit
            .record(
                AuditEvent::new(actions::IMPERSONATION_STARTED)
                    .tenant(Some(tenant_id))
                    .actor(actor_id)
                    .target("tenant", tenant_id),
            )
            .await?;

        tracing::info!("Impersonation started");
        Ok(token)
    }

    /// End impersonation. Succeeds whether or not an indicator was present.
    #[tracing::instrument(skip(self, token))]
    pub async fn exit(&self, actor_id: Uuid, token: Option<&str>) {
        let Some(tenant_id) = token.and_then(|t| self.active_tenant(actor_id, t)) else {
            tracing::debug!("No active impersonation to end");
            return;
        };

        self.audit
            .record_best_effort(
                AuditEvent::new(actions::IMPERSONATION_ENDED)
                    .tenant(Some(tenant_id))
                    .actor(actor_id)
                    .target("tenant", tenant_id),
            )
            .await;
        tracing::info!(tenant_id = %tenant_id, "Impersonation ended");
    }

    /// The tenant `actor_id` is currently impersonating, if the indicator is
    /// authentic, unexpired and theirs.
    pub fn active_tenant(&self, actor_id: Uuid, token: &str) -> Option<Uuid> {
        self.codec
            .verify(token)
            .filter(|assertion| assertion.subject_id == actor_id)
            .and_then(|assertion| assertion.scope.tenant_id())
    }
}
