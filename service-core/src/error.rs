use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    /// The session is intact but the action needs a fresh second factor.
    /// Carries the re-authentication target.
    #[error("Step-up required")]
    StepUpRequired(String),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            redirect_to: Option<String>,
        }

        let mut redirect_to = None;
        let mut retry_after = None;

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(err.to_string()),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            // Authentication failures never carry details: no oracle for the caller.
            AppError::Unauthorized(err) => {
                tracing::debug!(reason = %err, "Rejecting unauthenticated request");
                (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string(), None)
            }
            AppError::StepUpRequired(target) => {
                redirect_to = Some(target);
                (
                    StatusCode::PRECONDITION_REQUIRED,
                    "step_up_required".to_string(),
                    None,
                )
            }
            AppError::Forbidden(err) => (StatusCode::FORBIDDEN, err.to_string(), None),
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::TooManyRequests(msg, retry) => {
                retry_after = retry;
                (StatusCode::TOO_MANY_REQUESTS, msg, None)
            }
            AppError::InternalError(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            AppError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
                None,
            ),
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    None,
                )
            }
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
                redirect_to: redirect_to.clone(),
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut().insert(header::RETRY_AFTER, retry.into());
        }

        if let Some(target) = redirect_to {
            if let Ok(value) = HeaderValue::from_str(&target) {
                res.headers_mut().insert(header::LOCATION, value);
            }
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_step_up_is_distinct_from_unauthorized() {
        let step_up = AppError::StepUpRequired("/auth/step-up?scope=global".to_string())
            .into_response();
        let unauth = AppError::Unauthorized(anyhow::anyhow!("session revoked")).into_response();

        assert_eq!(step_up.status(), StatusCode::PRECONDITION_REQUIRED);
        assert_eq!(unauth.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            step_up.headers()[header::LOCATION],
            "/auth/step-up?scope=global"
        );

        let body = step_up.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "step_up_required");
        assert_eq!(json["redirect_to"], "/auth/step-up?scope=global");
    }

    #[tokio::test]
    async fn test_unauthorized_hides_reason() {
        let res = AppError::Unauthorized(anyhow::anyhow!("session version stale")).into_response();
        let body = res.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(!text.contains("stale"));
        assert!(text.contains("Unauthenticated"));
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let res = AppError::TooManyRequests("slow down".to_string(), Some(30)).into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[header::RETRY_AFTER], "30");
    }
}
