use std::net::SocketAddr;
use std::sync::Arc;

use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use tokio::signal;
use trust_service::{
    build_router,
    config::TrustConfig,
    db,
    services::{Database, MemoryStore, TotpVerifier},
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = TrustConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting trust service"
    );

    let verifier = Arc::new(TotpVerifier::new(config.step_up.totp_issuer.clone()));

    let state = match &config.database {
        Some(db_config) => {
            let pool = db::create_pool(db_config)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;

            let database = Database::new(pool);
            AppState::build(&config, Arc::new(database.clone()), verifier, Some(database))?
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store. State is lost on restart");
            AppState::build(&config, Arc::new(MemoryStore::new()), verifier, None)?
        }
    };
    tracing::info!("Services initialized");

    let app = build_router(state);

    let addr = config.common.bind_addr();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
