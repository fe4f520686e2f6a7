use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use service_core::{error::AppError, middleware::rate_limit::check_key};
use uuid::Uuid;

use super::{credentials, removal_cookie, token_cookie};
use crate::middleware::ActingClaim;
use crate::services::{AccessPolicy, IMPERSONATION_COOKIE};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ImpersonationResponse {
    pub tenant_id: Uuid,
    pub expires_in: i64,
}

/// Enter a tenant's context as a superadmin.
pub async fn enter(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    Path(tenant_id): Path<Uuid>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ImpersonationResponse>), AppError> {
    check_key(
        &state.impersonation_limiter,
        &claim.user_id,
        "Too many impersonation attempts. Please try again later.",
    )?;

    let policy = AccessPolicy {
        recent_step_up: true,
        ..AccessPolicy::superadmin()
    };
    let grant = state
        .access
        .authorize(&claim, policy, &credentials(&jar, None))
        .await?;

    let token = state
        .impersonation
        .enter(grant.user.user_id, tenant_id)
        .await?;

    let ttl = state.impersonation.ttl();
    let jar = jar.add(token_cookie(
        IMPERSONATION_COOKIE.to_string(),
        token,
        ttl,
        state.secure_cookies,
    ));

    Ok((
        jar,
        Json(ImpersonationResponse {
            tenant_id,
            expires_in: ttl.num_seconds(),
        }),
    ))
}

/// Leave impersonation. Always succeeds for a live session.
pub async fn exit(
    State(state): State<AppState>,
    ActingClaim(claim): ActingClaim,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    let grant = state
        .access
        .authorize(&claim, AccessPolicy::session(), &credentials(&jar, None))
        .await?;

    let token = jar.get(IMPERSONATION_COOKIE).map(|c| c.value().to_string());
    state
        .impersonation
        .exit(grant.user.user_id, token.as_deref())
        .await;

    Ok((
        jar.remove(removal_cookie(IMPERSONATION_COOKIE)),
        StatusCode::NO_CONTENT,
    ))
}
