use axum::{
    extract::{Path, State},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::credentials;
use crate::middleware::ActingClaim;
use crate::services::AccessPolicy;
use crate::AppState;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RevokeSessionRequest {
    #[validate(length(max = 255))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevokedResponse {
    pub revoked: bool,
}

/// Revoke one of the caller's sessions. Needs a recent global step-up.
pub async fn revoke_session(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    Path(session_id): Path<Uuid>,
    jar: CookieJar,
    payload: Option<Json<RevokeSessionRequest>>,
) -> Result<Json<RevokedResponse>, AppError> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    payload.validate()?;

    state
        .access
        .authorize(
            &claim,
            AccessPolicy::account_sensitive(),
            &credentials(&jar, None),
        )
        .await?;

    let reason = payload.reason.as_deref().unwrap_or("user_revoked");
    let revoked = state
        .sessions
        .revoke_session(claim.user_id, session_id, reason)
        .await?;

    Ok(Json(RevokedResponse { revoked }))
}

/// Stop trusting one of the caller's devices.
pub async fn revoke_device(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    Path(device_hash): Path<String>,
    jar: CookieJar,
) -> Result<Json<RevokedResponse>, AppError> {
    state
        .access
        .authorize(&claim, AccessPolicy::account(), &credentials(&jar, None))
        .await?;

    let revoked = state
        .sessions
        .revoke_device(claim.user_id, &device_hash)
        .await?;

    Ok(Json(RevokedResponse { revoked }))
}
