use axum::{extract::State, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use service_core::{error::AppError, middleware::rate_limit::check_key};
use uuid::Uuid;
use validator::Validate;

use super::{credentials, token_cookie};
use crate::middleware::ActingClaim;
use crate::services::{AccessPolicy, PresentedCode, Scope, StepUpRequest};
use crate::AppState;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CodeMethod {
    Totp,
    Recovery,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyStepUpRequest {
    /// Absent for an account-wide (global) step-up.
    pub tenant_id: Option<Uuid>,
    pub method: CodeMethod,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 128))]
    pub device_hash: Option<String>,
    #[validate(length(max = 255))]
    pub device_label: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyStepUpResponse {
    pub scope: String,
    pub expires_in: i64,
    pub used_recovery_code: bool,
    pub remaining_recovery_codes: usize,
}

/// Verify a second factor and set the step-up cookie for the requested scope.
pub async fn verify_step_up(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    jar: CookieJar,
    Json(payload): Json<VerifyStepUpRequest>,
) -> Result<(CookieJar, Json<VerifyStepUpResponse>), AppError> {
    check_key(
        &state.step_up_user_limiter,
        &claim.user_id,
        "Too many step-up attempts. Please try again later.",
    )?;
    payload.validate()?;

    // The session only needs to be live here; this is how the step-up flag clears.
    let policy = AccessPolicy {
        tenant_id: payload.tenant_id,
        ..AccessPolicy::session()
    };
    state
        .access
        .authorize(&claim, policy, &credentials(&jar, payload.tenant_id))
        .await?;

    let scope = payload.tenant_id.map(Scope::Tenant).unwrap_or(Scope::Global);
    let code = match payload.method {
        CodeMethod::Totp => PresentedCode::Totp(payload.code),
        CodeMethod::Recovery => PresentedCode::Recovery(payload.code),
    };

    let issued = state
        .mfa
        .verify_step_up(StepUpRequest {
            claim,
            scope,
            code,
            device_hash: payload.device_hash,
            device_label: payload.device_label,
        })
        .await?;

    let jar = jar.add(token_cookie(
        scope.cookie_name(),
        issued.token,
        issued.ttl,
        state.secure_cookies,
    ));

    Ok((
        jar,
        Json(VerifyStepUpResponse {
            scope: scope.to_string(),
            expires_in: issued.ttl.num_seconds(),
            used_recovery_code: issued.used_recovery_code,
            remaining_recovery_codes: issued.remaining_recovery_codes,
        }),
    ))
}
