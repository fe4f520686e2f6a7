//! Shared setup for trust-service integration tests.
//!
//! Everything runs against the in-memory store with a fixed second-factor
//! verifier, so no database is needed.

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use service_core::config::Config;
use tower::util::ServiceExt;
use trust_service::{
    build_router,
    config::{Environment, ImpersonationConfig, RateLimitConfig, StepUpConfig, TrustConfig},
    middleware::claims::{SESSION_ID_HEADER, SESSION_VERSION_HEADER, USER_ID_HEADER},
    models::{SessionClaim, SessionRecord, TenantPolicy, UserSecurityState},
    services::{MemoryStore, Provisioned, SecondFactorVerifier},
    AppState,
};
use uuid::Uuid;

pub const GOOD_CODE: &str = "123456";

/// Accepts exactly [`GOOD_CODE`], each time as if from a later time step.
#[derive(Default)]
pub struct FixedVerifier {
    step: AtomicI64,
}

impl SecondFactorVerifier for FixedVerifier {
    fn provision(&self, account: &str) -> anyhow::Result<Provisioned> {
        Ok(Provisioned {
            secret: "JBSWY3DPEHPK3PXP".to_string(),
            otpauth_url: format!("otpauth://totp/Trust:{}", account),
        })
    }

    fn verify(&self, _secret: &str, code: &str) -> Option<i64> {
        (code == GOOD_CODE).then(|| self.step.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub fn test_config() -> TrustConfig {
    let secret = SecretString::new("integration-test-secret".to_string());
    TrustConfig {
        common: Config::default(),
        environment: Environment::Dev,
        service_name: "trust-service-test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: None,
        step_up: StepUpConfig {
            secret: secret.clone(),
            recovery_pepper: secret,
            ttl_minutes: 720,
            recent_minutes: 5,
            accept_global: true,
            redirect_path: "/auth/step-up".to_string(),
            recovery_code_count: 10,
            totp_issuer: "Trust".to_string(),
        },
        impersonation: ImpersonationConfig { ttl_minutes: 60 },
        rate_limit: RateLimitConfig {
            step_up_attempts: 100,
            step_up_window_seconds: 60,
            impersonation_attempts: 100,
            impersonation_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    pub router: Router,
    pub tenant_id: Uuid,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: TrustConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        store.insert_tenant(TenantPolicy {
            tenant_id,
            security_alerts_enabled: true,
        });

        let state = AppState::build(&config, store.clone(), Arc::new(FixedVerifier::default()), None)
            .expect("Failed to build app state");
        let router = build_router(state.clone());

        Self {
            store,
            state,
            router,
            tenant_id,
        }
    }

    /// Seed a tenant member with one live session.
    pub fn seed_member(&self, requires_step_up: bool) -> SessionClaim {
        self.seed_user(UserSecurityState::new(Uuid::new_v4()), requires_step_up)
    }

    /// Seed a tenant member holding the admin role.
    pub fn seed_admin(&self) -> SessionClaim {
        let claim = self.seed_member(false);
        self.store.add_admin(self.tenant_id, claim.user_id);
        claim
    }

    pub fn seed_superadmin(&self) -> SessionClaim {
        let mut user = UserSecurityState::new(Uuid::new_v4());
        user.is_superadmin = true;
        self.store.insert_user(user.clone());
        let session = SessionRecord::new(user.user_id, None, false);
        let claim = SessionClaim::for_session(&session, user.session_version);
        self.store.insert_session(session);
        claim
    }

    pub fn seed_user(&self, user: UserSecurityState, requires_step_up: bool) -> SessionClaim {
        let session = SessionRecord::new(user.user_id, Some("laptop".into()), requires_step_up);
        let claim = SessionClaim::for_session(&session, user.session_version);
        self.store.add_member(self.tenant_id, user.user_id);
        self.store.insert_user(user);
        self.store.insert_session(session);
        claim
    }

    /// Enroll the claim's user and return their recovery codes.
    pub async fn enroll(&self, claim: &SessionClaim) -> Vec<String> {
        self.state
            .mfa
            .begin_enrollment(claim.user_id, "user@example.com")
            .await
            .expect("Failed to begin enrollment");
        self.state
            .mfa
            .confirm_enrollment(claim.user_id, Some(self.tenant_id), GOOD_CODE)
            .await
            .expect("Failed to confirm enrollment")
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request")
    }
}

/// Set the client address the edge proxy reports.
pub fn forwarded_for(mut request: Request<Body>, ip: &str) -> Request<Body> {
    request.headers_mut().insert(
        "x-forwarded-for",
        ip.parse().expect("Invalid forwarded address"),
    );
    request
}

/// A request carrying the gateway claim headers.
pub fn request(
    method: &str,
    uri: &str,
    claim: Option<&SessionClaim>,
    cookies: &[String],
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(claim) = claim {
        builder = builder
            .header(USER_ID_HEADER, claim.user_id.to_string())
            .header(SESSION_ID_HEADER, claim.session_id.to_string())
            .header(SESSION_VERSION_HEADER, claim.session_version.to_string());
    }
    if !cookies.is_empty() {
        builder = builder.header(header::COOKIE, cookies.join("; "));
    }

    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("Failed to build request")
}

/// `name=value` pairs from every `Set-Cookie` header.
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(|pair| pair.trim().to_string())
        .collect()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body was not JSON")
}
