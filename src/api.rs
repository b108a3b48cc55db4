//! REST API server for the task orchestrator
//!
//! Async submit/poll, a blocking variant (also the peer delegation
//! endpoint) and a health probe.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::delegation::CORRELATION_HEADER;
use crate::error::OrchestrationError;
use crate::models::{TaskRecord, TaskRequest, TaskStatus};
use crate::orchestrator::TaskOrchestrator;

/// Status responses carry at most this much output.
pub const MAX_STATUS_OUTPUT_CHARS: usize = 8000;

const TRUNCATION_MARKER: &str = "\n...[output truncated]";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RunRequest {
    pub goal: String,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub project_context: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RunQuery {
    #[serde(default)]
    pub async_mode: bool,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ApiResponse::error(message))).into_response()
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<TaskOrchestrator>,
}

/// =============================
/// Helpers
/// =============================

/// Body field first, then the header.
fn resolve_correlation_id(body: Option<String>, headers: &HeaderMap) -> Option<String> {
    body.filter(|c| !c.trim().is_empty()).or_else(|| {
        headers
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    })
}

pub fn truncate_output(output: &str) -> String {
    if output.chars().count() <= MAX_STATUS_OUTPUT_CHARS {
        return output.to_string();
    }
    let mut truncated: String = output.chars().take(MAX_STATUS_OUTPUT_CHARS).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

fn sync_body(record: &TaskRecord) -> serde_json::Value {
    let status = match record.status {
        TaskStatus::Completed => "success",
        _ => "failed",
    };
    json!({
        "status": status,
        "task_id": record.id,
        "output": record.output.clone().unwrap_or_default(),
        "knowledge": record.knowledge,
        "error": record.error,
        "correlation_id": record.correlation_id,
    })
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Run Endpoint
/// =============================

async fn run_task(
    State(state): State<ApiState>,
    Query(query): Query<RunQuery>,
    headers: HeaderMap,
    Json(req): Json<RunRequest>,
) -> Response {
    let request = TaskRequest {
        goal: req.goal,
        max_steps: req.max_steps,
        project_context: req.project_context,
        correlation_id: resolve_correlation_id(req.correlation_id, &headers),
    };

    info!(
        async_mode = query.async_mode,
        correlation_id = ?request.correlation_id,
        "Received run request"
    );

    if query.async_mode {
        return match state.orchestrator.submit(request).await {
            Ok(handle) => (
                StatusCode::ACCEPTED,
                Json(json!({
                    "task_id": handle.task_id,
                    "correlation_id": handle.correlation_id,
                    "status": "accepted",
                    "status_url": format!("/run/status/{}", handle.task_id),
                    "message": "Task accepted. Poll status_url for progress.",
                })),
            )
                .into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Submit failed: {}", e)),
        };
    }

    match state.orchestrator.run_sync(request).await {
        Ok(record) => (StatusCode::OK, Json(sync_body(&record))).into_response(),
        Err(e @ OrchestrationError::SyncTimeout { .. }) => {
            warn!(error = %e, "Synchronous run timed out");
            error_response(StatusCode::GATEWAY_TIMEOUT, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Run failed: {}", e)),
    }
}

/// =============================
/// Status Endpoint
/// =============================

async fn task_status(State(state): State<ApiState>, Path(task_id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&task_id) else {
        return error_response(StatusCode::NOT_FOUND, format!("Task not found: {}", task_id));
    };

    match state.orchestrator.get_status(id).await {
        Ok(record) => Json(json!({
            "task_id": record.id,
            "status": record.status,
            "stage": record.stage,
            "output": record.output.as_deref().map(truncate_output),
            "knowledge": record.knowledge,
            "error": record.error,
            "correlation_id": record.correlation_id,
            "updated_at": record.updated_at.to_rfc3339(),
        }))
        .into_response(),
        Err(e @ OrchestrationError::TaskNotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<TaskOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/run", post(run_task))
        .route("/run/status/:task_id", get(task_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<TaskOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
