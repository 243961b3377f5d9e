use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    get_alert, get_script, health_check, list_alerts, list_scripts, metrics, run_all, run_script,
    AppState,
};

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Scripts
        .route("/scripts", get(list_scripts))
        .route("/scripts/run", post(run_all))
        .route("/scripts/:name", get(get_script))
        .route("/scripts/:name/run", post(run_script))
        // Alerts
        .route("/alerts", get(list_alerts))
        .route("/alerts/:name", get(get_alert))
        .route("/metrics", get(metrics))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the API until `shutdown` fires
pub async fn run_server(
    address: &str,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = build_router(state);

    let listener = TcpListener::bind(address).await?;
    tracing::info!("Starting API server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
