//! Audit log writer. Each written record is handed to the alert engine.

use std::sync::Arc;

use super::alerts::AlertEngine;
use super::error::ServiceError;
use super::store::AuditStore;
use crate::models::AuditEvent;

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn AuditStore>,
    alerts: AlertEngine,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>, alerts: AlertEngine) -> Self {
        Self { store, alerts }
    }

    /// Write the audit record, then derive alerts from it.
    ///
    /// Alert derivation runs only after the record is durable and cannot fail
    /// this call.
    pub async fn record(&self, event: AuditEvent) -> Result<AuditEvent, ServiceError> {
        self.store.insert_audit_event(&event).await?;

        tracing::info!(
            audit_id = %event.audit_id,
            action = %event.action,
            tenant_id = ?event.tenant_id,
            actor_user_id = ?event.actor_user_id,
            "Audit event recorded"
        );

        self.alerts.on_audit_written(&event).await;
        Ok(event)
    }

    /// Record an audit event for a side effect that must not fail its request.
    pub async fn record_best_effort(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.record(event).await {
            tracing::warn!(action = %action, error = %e, "Failed to write audit event");
        }
    }
}
