pub mod health;
pub mod impersonation;
pub mod mfa;
pub mod sessions;
pub mod step_up;
pub mod tenant_admin;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use uuid::Uuid;

use crate::services::{Scope, StepUpCredentials, GLOBAL_STEP_UP_COOKIE, IMPERSONATION_COOKIE};

/// Collect the step-up and impersonation tokens relevant to `tenant_id`.
pub fn credentials(jar: &CookieJar, tenant_id: Option<Uuid>) -> StepUpCredentials {
    let value = |name: &str| jar.get(name).map(|c| c.value().to_string());

    StepUpCredentials {
        tenant_token: tenant_id.and_then(|id| value(&Scope::Tenant(id).cookie_name())),
        global_token: value(GLOBAL_STEP_UP_COOKIE),
        impersonation_token: value(IMPERSONATION_COOKIE),
    }
}

/// HTTP-only, `SameSite=Lax` cookie; `Secure` outside dev.
pub fn token_cookie(
    name: String,
    value: String,
    max_age: chrono::Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age.num_seconds()))
        .build()
}

pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}
