use axum::{extract::State, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::AppState;

/// Liveness plus a database ping when one is configured.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    if let Some(database) = &state.database {
        database
            .health_check()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;
    }

    Ok(Json(json!({
        "status": "ok",
        "service": "trust-service",
    })))
}
