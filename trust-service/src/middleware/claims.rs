//! Session claims asserted by the identity gateway.
//!
//! The gateway authenticates the session cookie and forwards the claimed
//! identity as headers. Nothing here trusts the claim beyond parsing it; every
//! protected handler reconciles it through the access orchestrator.

use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::SessionClaim;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const SESSION_VERSION_HEADER: &str = "x-session-version";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

pub fn claim_from_headers(headers: &HeaderMap) -> Option<SessionClaim> {
    Some(SessionClaim {
        user_id: Uuid::parse_str(header(headers, USER_ID_HEADER)?).ok()?,
        session_id: Uuid::parse_str(header(headers, SESSION_ID_HEADER)?).ok()?,
        session_version: header(headers, SESSION_VERSION_HEADER)?.parse().ok()?,
    })
}

/// Reject requests without a well-formed claim; attach it otherwise.
pub async fn claim_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    let claim = claim_from_headers(req.headers()).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or malformed session claim"))
    })?;

    req.extensions_mut().insert(claim);
    Ok(next.run(req).await)
}

/// Extractor for the claim attached by [`claim_middleware`].
pub struct ActingClaim(pub SessionClaim);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ActingClaim
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionClaim>()
            .copied()
            .map(ActingClaim)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Session claim missing")))
    }
}
