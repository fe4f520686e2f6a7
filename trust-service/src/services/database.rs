//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::{postgres::PgPool, types::Json, FromRow};
use uuid::Uuid;

use super::error::ServiceError;
use super::store::{
    AlertStore, AuditStore, SessionStore, TenantPolicyStore, TrustedDeviceStore, UserStore,
};
use crate::models::{
    AuditEvent, SecurityAlert, SessionRecord, StoredRecoveryCode, TenantPolicy,
    TrustedDevice, UserSecurityState,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(FromRow)]
struct UserRow {
    user_id: Uuid,
    session_version: i64,
    second_factor_secret: Option<String>,
    second_factor_enabled: bool,
    second_factor_enabled_at: Option<DateTime<Utc>>,
    recovery_codes: Json<Vec<StoredRecoveryCode>>,
    last_totp_step: Option<i64>,
    must_change_password: bool,
    is_superadmin: bool,
}

impl From<UserRow> for UserSecurityState {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: row.user_id,
            session_version: row.session_version,
            second_factor_secret: row.second_factor_secret,
            second_factor_enabled: row.second_factor_enabled,
            second_factor_enabled_at: row.second_factor_enabled_at,
            recovery_codes: row.recovery_codes.0,
            last_totp_step: row.last_totp_step,
            must_change_password: row.must_change_password,
            is_superadmin: row.is_superadmin,
        }
    }
}

#[derive(FromRow)]
struct TenantRow {
    tenant_id: Uuid,
    security_alerts_enabled: bool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

fn expect_user_row(rows_affected: u64) -> Result<(), ServiceError> {
    if rows_affected == 0 {
        return Err(ServiceError::UserNotFound);
    }
    Ok(())
}

// ==================== Users ====================

#[async_trait]
impl UserStore for Database {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserSecurityState>, ServiceError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, session_version, second_factor_secret, second_factor_enabled,
                   second_factor_enabled_at, recovery_codes, last_totp_step,
                   must_change_password, is_superadmin
            FROM users WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserSecurityState::from))
    }

    async fn is_tenant_member(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tenant_members WHERE tenant_id = $1 AND user_id = $2)",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn is_tenant_admin(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM tenant_members
                WHERE tenant_id = $1 AND user_id = $2 AND role = 'admin'
            )
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn tenant_memberships(&self, user_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let tenants = sqlx::query_scalar::<_, Uuid>(
            "SELECT tenant_id FROM tenant_members WHERE user_id = $1 ORDER BY tenant_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }

    async fn bump_session_version(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE users SET session_version = session_version + 1
            WHERE user_id = $1
            RETURNING session_version
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::UserNotFound)
    }

    async fn store_second_factor_secret(
        &self,
        user_id: Uuid,
        secret: &str,
    ) -> Result<(), ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET second_factor_secret = $2, second_factor_enabled = FALSE,
                second_factor_enabled_at = NULL
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(secret)
        .execute(&self.pool)
        .await?;
        expect_user_row(result.rows_affected())
    }

    async fn enable_second_factor(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET second_factor_enabled = TRUE, second_factor_enabled_at = NOW()
            WHERE user_id = $1 AND second_factor_secret IS NOT NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        expect_user_row(result.rows_affected())
    }

    async fn disable_second_factor(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET second_factor_secret = NULL, second_factor_enabled = FALSE,
                second_factor_enabled_at = NULL, recovery_codes = '[]'::jsonb,
                last_totp_step = NULL
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        expect_user_row(result.rows_affected())
    }

    async fn replace_recovery_codes(
        &self,
        user_id: Uuid,
        codes: &[StoredRecoveryCode],
    ) -> Result<(), ServiceError> {
        let result = sqlx::query("UPDATE users SET recovery_codes = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(Json(codes))
            .execute(&self.pool)
            .await?;
        expect_user_row(result.rows_affected())
    }

    async fn swap_recovery_codes(
        &self,
        user_id: Uuid,
        expected: &[StoredRecoveryCode],
        updated: &[StoredRecoveryCode],
    ) -> Result<bool, ServiceError> {
        // jsonb equality is structural, so the snapshot compares by content.
        let result = sqlx::query(
            "UPDATE users SET recovery_codes = $3 WHERE user_id = $1 AND recovery_codes = $2",
        )
        .bind(user_id)
        .bind(Json(expected))
        .bind(Json(updated))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_totp_step(&self, user_id: Uuid, step: i64) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET last_totp_step = $2
            WHERE user_id = $1 AND (last_totp_step IS NULL OR last_totp_step < $2)
            "#,
        )
        .bind(user_id)
        .bind(step)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ==================== Sessions ====================

#[async_trait]
impl SessionStore for Database {
    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionRecord>, ServiceError> {
        let session = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT session_id, user_id, revoked_at, revoked_by_user_id, revoked_reason,
                   requires_step_up, device_hash, last_seen_at, created_at
            FROM sessions WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        revoked_by: Uuid,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_at = NOW(), revoked_by_user_id = $2, revoked_reason = $3
            WHERE session_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(revoked_by)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_sessions(
        &self,
        user_id: Uuid,
        revoked_by: Uuid,
        reason: &str,
    ) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_at = NOW(), revoked_by_user_id = $2, revoked_reason = $3
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(revoked_by)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn clear_step_up(&self, session_id: Uuid) -> Result<(), ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET requires_step_up = FALSE, last_seen_at = NOW()
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::SessionNotFound);
        }
        Ok(())
    }
}

// ==================== Trusted devices ====================

#[async_trait]
impl TrustedDeviceStore for Database {
    async fn approve_device(&self, device: &TrustedDevice) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO trusted_devices (user_id, device_hash, label, approved_at, revoked_at, last_seen_at)
            VALUES ($1, $2, $3, $4, NULL, $5)
            ON CONFLICT (user_id, device_hash) DO UPDATE SET
                approved_at = CASE WHEN trusted_devices.revoked_at IS NULL
                                   THEN trusted_devices.approved_at
                                   ELSE EXCLUDED.approved_at END,
                revoked_at = NULL,
                last_seen_at = EXCLUDED.last_seen_at,
                label = COALESCE(EXCLUDED.label, trusted_devices.label)
            "#,
        )
        .bind(device.user_id)
        .bind(&device.device_hash)
        .bind(&device.label)
        .bind(device.approved_at)
        .bind(device.last_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_device(&self, user_id: Uuid, device_hash: &str) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE trusted_devices SET revoked_at = NOW()
            WHERE user_id = $1 AND device_hash = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(device_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ==================== Audit & alerts ====================

#[async_trait]
impl AuditStore for Database {
    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events
                (audit_id, tenant_id, actor_user_id, action, target_type, target_id, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.audit_id)
        .bind(event.tenant_id)
        .bind(event.actor_user_id)
        .bind(&event.action)
        .bind(&event.target_type)
        .bind(event.target_id)
        .bind(&event.meta)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for Database {
    async fn insert_alert(&self, alert: &SecurityAlert) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO security_alerts (alert_id, tenant_id, audit_id, level, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(alert.alert_id)
        .bind(alert.tenant_id)
        .bind(alert.audit_id)
        .bind(alert.level.as_str())
        .bind(&alert.message)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TenantPolicyStore for Database {
    async fn find_tenant_policy(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantPolicy>, ServiceError> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT tenant_id, security_alerts_enabled FROM tenants WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TenantPolicy {
            tenant_id: row.tenant_id,
            security_alerts_enabled: row.security_alerts_enabled,
        }))
    }
}
