//! HTTP control API (axum).
//!
//! | Method | Path | Result |
//! |--------|------|--------|
//! | GET | `/api/v1/health` | `OK` |
//! | GET | `/api/v1/services` | `[ServiceStatus]` |
//! | GET | `/api/v1/services/:name` | `ServiceStatus` |
//! | POST | `/api/v1/services/:name/start[?skip_compliance_check=true]` | `OperationOutcome` |
//! | POST | `/api/v1/services/:name/stop` | `OperationOutcome` |
//! | POST | `/api/v1/services/:name/restart` | `OperationOutcome` |
//! | POST | `/api/v1/start-all` | `[OperationOutcome]` |
//! | POST | `/api/v1/shutdown` | `[OperationOutcome]` |
//! | GET | `/api/v1/compliance` | `ComplianceReport` |
//! | GET | `/api/v1/compliance/:name` | `ComplianceReport` |
//! | POST | `/api/v1/reload` (body `{"path": ...}` optional) | `ReloadOutcome` |
//!
//! Failed operations still return their outcome as the body, with status 404
//! for unknown services and 409 otherwise.

use crate::control::{ControlSurface, OperationOutcome, ReloadOutcome};
use crate::supervisor::ServiceStatus;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fleet_common::SupervisorError;
use fleet_compliance::ComplianceReport;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    #[serde(default)]
    pub skip_compliance_check: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReloadRequest {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn create_router(control: ControlSurface) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/services", get(list_handler))
        .route("/api/v1/services/:name", get(status_handler))
        .route("/api/v1/services/:name/start", post(start_handler))
        .route("/api/v1/services/:name/stop", post(stop_handler))
        .route("/api/v1/services/:name/restart", post(restart_handler))
        .route("/api/v1/start-all", post(start_all_handler))
        .route("/api/v1/shutdown", post(shutdown_handler))
        .route("/api/v1/compliance", get(compliance_all_handler))
        .route("/api/v1/compliance/:name", get(compliance_handler))
        .route("/api/v1/reload", post(reload_handler))
        .with_state(control)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, control: ControlSurface, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("Control API listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(control))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn list_handler(State(control): State<ControlSurface>) -> Result<Json<Vec<ServiceStatus>>, ApiError> {
    Ok(Json(control.status_all().await?))
}

async fn status_handler(
    State(control): State<ControlSurface>,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, ApiError> {
    Ok(Json(control.status(&name).await?))
}

async fn start_handler(
    State(control): State<ControlSurface>,
    Path(name): Path<String>,
    Query(params): Query<StartParams>,
) -> Response {
    outcome_response(control.start(&name, params.skip_compliance_check).await)
}

async fn stop_handler(State(control): State<ControlSurface>, Path(name): Path<String>) -> Response {
    outcome_response(control.stop(&name).await)
}

async fn restart_handler(State(control): State<ControlSurface>, Path(name): Path<String>) -> Response {
    outcome_response(control.restart(&name).await)
}

async fn start_all_handler(State(control): State<ControlSurface>) -> Json<Vec<OperationOutcome>> {
    Json(control.start_all().await)
}

async fn shutdown_handler(State(control): State<ControlSurface>) -> Json<Vec<OperationOutcome>> {
    Json(control.shutdown().await)
}

async fn compliance_all_handler(
    State(control): State<ControlSurface>,
) -> Result<Json<ComplianceReport>, ApiError> {
    Ok(Json(control.compliance_report(None).await?))
}

async fn compliance_handler(
    State(control): State<ControlSurface>,
    Path(name): Path<String>,
) -> Result<Json<ComplianceReport>, ApiError> {
    Ok(Json(control.compliance_report(Some(&name)).await?))
}

async fn reload_handler(
    State(control): State<ControlSurface>,
    request: Option<Json<ReloadRequest>>,
) -> (StatusCode, Json<ReloadOutcome>) {
    let path = request.and_then(|Json(r)| r.path);
    let outcome = control.reload(path.as_deref()).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(outcome))
}

fn outcome_response(outcome: OperationOutcome) -> Response {
    let status = if outcome.success {
        StatusCode::OK
    } else if outcome.state.is_none() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(outcome)).into_response()
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            SupervisorError::Unavailable { .. } => ApiError::Unavailable(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        error!("API error: {} - {}", status, message);

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
