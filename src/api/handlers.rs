use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::alerts::{AlertError, AlertManager, AlertMetric};
use crate::runner::{Runner, RunnerError, ScriptStatus};
use crate::storage::Alert;

/// Application state shared across handlers
pub struct AppState {
    pub runner: Arc<Runner>,
    pub alerts: Arc<AlertManager>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Scripts
// ============================================================================

pub async fn list_scripts(State(state): State<Arc<AppState>>) -> Json<Vec<ScriptStatus>> {
    Json(state.runner.statuses())
}

pub async fn get_script(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ScriptStatus>, ApiError> {
    state
        .runner
        .status(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("script '{}' not found", name)))
}

#[derive(Serialize)]
pub struct RunResponse {
    /// Runs started; scripts already running follow the overlap policy
    pub started: usize,
}

pub async fn run_all(State(state): State<Arc<AppState>>) -> Result<Json<RunResponse>, ApiError> {
    let started = state.runner.trigger(None)?;
    Ok(Json(RunResponse { started }))
}

pub async fn run_script(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let started = state.runner.trigger(Some(name.as_str()))?;
    Ok(Json(RunResponse { started }))
}

// ============================================================================
// Alerts
// ============================================================================

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    Ok(Json(state.alerts.all().await?))
}

pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Alert>, ApiError> {
    state
        .alerts
        .get(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("alert '{}' not found", name)))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<Vec<AlertMetric>> {
    Json(state.alerts.metrics().snapshot())
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<RunnerError> for ApiError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::UnknownScript(_) => ApiError::NotFound(e.to_string()),
            RunnerError::Stopped => ApiError::BadRequest(e.to_string()),
            RunnerError::Interpreter(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AlertError> for ApiError {
    fn from(e: AlertError) -> Self {
        match e {
            AlertError::Storage(_) => ApiError::Internal(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}
