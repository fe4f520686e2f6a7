use axum::{extract::State, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::credentials;
use crate::middleware::ActingClaim;
use crate::services::AccessPolicy;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct BeginEnrollmentRequest {
    #[validate(length(min = 1, max = 255))]
    pub account: String,
}

#[derive(Debug, Serialize)]
pub struct BeginEnrollmentResponse {
    pub secret: String,
    pub otpauth_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmEnrollmentRequest {
    pub tenant_id: Option<Uuid>,
    #[validate(length(min = 6, max = 8))]
    pub code: String,
}

/// Plaintext codes. Returned once and never again.
#[derive(Debug, Serialize)]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Vec<String>,
}

pub async fn begin_enrollment(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    jar: CookieJar,
    Json(payload): Json<BeginEnrollmentRequest>,
) -> Result<Json<BeginEnrollmentResponse>, AppError> {
    payload.validate()?;
    state
        .access
        .authorize(&claim, AccessPolicy::session(), &credentials(&jar, None))
        .await?;

    let provisioned = state
        .mfa
        .begin_enrollment(claim.user_id, &payload.account)
        .await?;

    Ok(Json(BeginEnrollmentResponse {
        secret: provisioned.secret,
        otpauth_url: provisioned.otpauth_url,
    }))
}

pub async fn confirm_enrollment(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    jar: CookieJar,
    Json(payload): Json<ConfirmEnrollmentRequest>,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    payload.validate()?;
    state
        .access
        .authorize(&claim, AccessPolicy::session(), &credentials(&jar, None))
        .await?;

    let recovery_codes = state
        .mfa
        .confirm_enrollment(claim.user_id, payload.tenant_id, &payload.code)
        .await?;

    Ok(Json(RecoveryCodesResponse { recovery_codes }))
}

/// Replace the caller's recovery codes. Needs a recent global step-up.
pub async fn regenerate_recovery_codes(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    jar: CookieJar,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    state
        .access
        .authorize(
            &claim,
            AccessPolicy::account_sensitive(),
            &credentials(&jar, None),
        )
        .await?;

    let recovery_codes = state.mfa.regenerate_recovery_codes(claim.user_id).await?;
    Ok(Json(RecoveryCodesResponse { recovery_codes }))
}
