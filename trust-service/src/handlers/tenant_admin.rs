use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::credentials;
use crate::middleware::ActingClaim;
use crate::services::{AccessPolicy, ServiceError, SignOutSummary};
use crate::AppState;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SignOutEverywhereRequest {
    #[validate(length(max = 255))]
    pub reason: Option<String>,
}

/// Revoke every session of a tenant member. Tenant admins only.
pub async fn sign_out_everywhere(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    Path((tenant_id, user_id)): Path<(Uuid, Uuid)>,
    jar: CookieJar,
    payload: Option<Json<SignOutEverywhereRequest>>,
) -> Result<Json<SignOutSummary>, AppError> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    payload.validate()?;

    let grant = state
        .access
        .authorize(
            &claim,
            AccessPolicy::tenant_admin(tenant_id),
            &credentials(&jar, Some(tenant_id)),
        )
        .await?;

    ensure_member(&state, tenant_id, user_id).await?;

    let reason = payload.reason.as_deref().unwrap_or("admin_sign_out");
    let summary = state
        .sessions
        .sign_out_everywhere(grant.user.user_id, Some(tenant_id), user_id, reason)
        .await?;

    Ok(Json(summary))
}

/// Remove a tenant member's second factor. Tenant admins only.
pub async fn reset_second_factor(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    Path((tenant_id, user_id)): Path<(Uuid, Uuid)>,
    jar: CookieJar,
) -> Result<StatusCode, AppError> {
    let grant = state
        .access
        .authorize(
            &claim,
            AccessPolicy::tenant_admin(tenant_id),
            &credentials(&jar, Some(tenant_id)),
        )
        .await?;

    state
        .mfa
        .admin_reset(grant.user.user_id, tenant_id, user_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_member(state: &AppState, tenant_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
    if state.users.is_tenant_member(tenant_id, user_id).await? {
        Ok(())
    } else {
        Err(ServiceError::UserNotFound.into())
    }
}
