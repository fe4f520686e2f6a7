pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::{
    create_ip_rate_limiter, create_keyed_rate_limiter, ip_rate_limit_middleware, IpRateLimiter,
    KeyedRateLimiter,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::TrustConfig;
use crate::middleware::claim_middleware;
use crate::services::{
    AccessOrchestrator, AlertEngine, AlertStore, AuditService, AuditStore, Database,
    ImpersonationService, MfaService, RecoveryVault, SecondFactorVerifier, SessionGuard,
    SessionService, SessionStore, StepUpCodec, TenantPolicyStore, TrustedDeviceStore, UserStore,
    PURPOSE_IMPERSONATION, PURPOSE_STEP_UP,
};

#[derive(Clone)]
pub struct AppState {
    pub access: AccessOrchestrator,
    pub mfa: MfaService,
    pub sessions: SessionService,
    pub impersonation: ImpersonationService,
    pub users: Arc<dyn UserStore>,
    /// Present when backed by Postgres; pinged by `/health`.
    pub database: Option<Database>,
    pub step_up_limiter: IpRateLimiter,
    /// Same budget as `step_up_limiter`, keyed by the acting user.
    pub step_up_user_limiter: KeyedRateLimiter<Uuid>,
    pub impersonation_limiter: KeyedRateLimiter<Uuid>,
    pub secure_cookies: bool,
}

impl AppState {
    /// Wire every service over a single store implementation.
    pub fn build<S>(
        config: &TrustConfig,
        store: Arc<S>,
        verifier: Arc<dyn SecondFactorVerifier>,
        database: Option<Database>,
    ) -> Result<Self, AppError>
    where
        S: UserStore
            + SessionStore
            + TrustedDeviceStore
            + AuditStore
            + AlertStore
            + TenantPolicyStore
            + 'static,
    {
        let users: Arc<dyn UserStore> = store.clone();
        let sessions: Arc<dyn SessionStore> = store.clone();
        let devices: Arc<dyn TrustedDeviceStore> = store.clone();
        let tenants: Arc<dyn TenantPolicyStore> = store.clone();
        let audit_store: Arc<dyn AuditStore> = store.clone();
        let alert_store: Arc<dyn AlertStore> = store;

        let step_up_codec = StepUpCodec::new(config.step_up.secret.clone(), PURPOSE_STEP_UP)
            .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
        let impersonation_codec =
            StepUpCodec::new(config.step_up.secret.clone(), PURPOSE_IMPERSONATION)
                .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
        let vault =
            RecoveryVault::new(config.step_up.recovery_pepper.clone()).map_err(AppError::ConfigError)?;

        let alerts = AlertEngine::new(tenants.clone(), alert_store);
        let audit = AuditService::new(audit_store, alerts);

        let impersonation = ImpersonationService::new(
            impersonation_codec,
            users.clone(),
            tenants,
            audit.clone(),
            chrono::Duration::minutes(config.impersonation.ttl_minutes),
        );

        let access = AccessOrchestrator::new(
            users.clone(),
            SessionGuard::new(users.clone(), sessions.clone()),
            step_up_codec.clone(),
            impersonation.clone(),
            chrono::Duration::minutes(config.step_up.recent_minutes),
            config.step_up.accept_global,
            config.step_up.redirect_path.clone(),
        );

        let mfa = MfaService::new(
            users.clone(),
            sessions.clone(),
            devices.clone(),
            audit.clone(),
            vault,
            verifier,
            step_up_codec,
            chrono::Duration::minutes(config.step_up.ttl_minutes),
            config.step_up.recovery_code_count,
        );

        let session_service = SessionService::new(users.clone(), sessions, devices, audit);

        Ok(Self {
            access,
            mfa,
            sessions: session_service,
            impersonation,
            users,
            database,
            step_up_limiter: create_ip_rate_limiter(
                config.rate_limit.step_up_attempts,
                config.rate_limit.step_up_window_seconds,
            ),
            step_up_user_limiter: create_keyed_rate_limiter(
                config.rate_limit.step_up_attempts,
                config.rate_limit.step_up_window_seconds,
            ),
            impersonation_limiter: create_keyed_rate_limiter(
                config.rate_limit.impersonation_attempts,
                config.rate_limit.impersonation_window_seconds,
            ),
            secure_cookies: config.is_prod(),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    // Code verification is the brute-force surface: limit it per IP here and
    // per user in the handler.
    let step_up_route = Router::new()
        .route("/auth/step-up", post(handlers::step_up::verify_step_up))
        .layer(from_fn_with_state(
            state.step_up_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let protected = Router::new()
        .merge(step_up_route)
        .route("/auth/mfa/enroll", post(handlers::mfa::begin_enrollment))
        .route(
            "/auth/mfa/enroll/confirm",
            post(handlers::mfa::confirm_enrollment),
        )
        .route(
            "/auth/mfa/recovery-codes",
            post(handlers::mfa::regenerate_recovery_codes),
        )
        .route(
            "/auth/sessions/:session_id/revoke",
            post(handlers::sessions::revoke_session),
        )
        .route(
            "/auth/devices/:device_hash",
            delete(handlers::sessions::revoke_device),
        )
        .route(
            "/tenants/:tenant_id/users/:user_id/sign-out-everywhere",
            post(handlers::tenant_admin::sign_out_everywhere),
        )
        .route(
            "/tenants/:tenant_id/users/:user_id/mfa/reset",
            post(handlers::tenant_admin::reset_second_factor),
        )
        .route(
            "/admin/impersonation/:tenant_id",
            post(handlers::impersonation::enter),
        )
        .route("/admin/impersonation", delete(handlers::impersonation::exit))
        .layer(from_fn(claim_middleware));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
}
