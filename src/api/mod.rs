//! Thin HTTP surface over the control service
//!
//! Handlers translate between JSON and the facade; no control logic lives
//! here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ControlError;
use crate::service::ControlService;
use crate::types::{ControlDecision, PlantingMethod};

/// Shared handler state
pub struct ApiState {
    pub service: Arc<ControlService>,
}

/// Build the controller's API router
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/fields/:field_id/initialize", post(initialize_field))
        .route("/api/v1/fields/:field_id/decision", post(make_decision))
        .route("/api/v1/fields/:field_id/irrigation", post(run_control_cycle))
        .route(
            "/api/v1/fields/:field_id/irrigation/execute",
            post(execute_decision),
        )
        .route(
            "/api/v1/fields/:field_id/irrigation/status",
            get(irrigation_status),
        )
        .route(
            "/api/v1/fields/:field_id/irrigation/stop",
            post(stop_irrigation),
        )
        .route(
            "/api/v1/fields/:field_id/recommendations",
            get(recommendations),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP mapping for control errors
struct ApiError(ControlError);

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ControlError::ConfigMissing(_) => StatusCode::NOT_FOUND,
            ControlError::AlreadyActive { .. } => StatusCode::CONFLICT,
            ControlError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ControlError::StationUnmapped(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ControlError::SensorUnavailable { .. }
            | ControlError::ActuatorUnreachable(_)
            | ControlError::HydraulicUnavailable(_)
            | ControlError::LearnerUnavailable(_)
            | ControlError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ControlError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_irrigations": state.service.active_irrigations(),
    }))
}

#[derive(Debug, Deserialize)]
struct InitializeRequest {
    planting_method: PlantingMethod,
    start_date: DateTime<Utc>,
}

async fn initialize_field(
    State(state): State<Arc<ApiState>>,
    Path(field_id): Path<String>,
    Json(request): Json<InitializeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state
        .service
        .initialize_field(&field_id, request.planting_method, request.start_date)
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn make_decision(
    State(state): State<Arc<ApiState>>,
    Path(field_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = state.service.make_control_decision(&field_id).await?;
    Ok(Json(decision))
}

/// Decide and execute in one call
async fn run_control_cycle(
    State(state): State<Arc<ApiState>>,
    Path(field_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = state.service.make_control_decision(&field_id).await?;
    let outcome = state.service.execute_irrigation(&field_id, &decision).await?;
    Ok(Json(serde_json::json!({
        "decision": decision,
        "outcome": outcome,
    })))
}

async fn execute_decision(
    State(state): State<Arc<ApiState>>,
    Path(field_id): Path<String>,
    Json(decision): Json<ControlDecision>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.execute_irrigation(&field_id, &decision).await?;
    Ok(Json(outcome))
}

async fn irrigation_status(
    State(state): State<Arc<ApiState>>,
    Path(field_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.service.irrigation_status(&field_id).await?;
    Ok(Json(view))
}

async fn recommendations(
    State(state): State<Arc<ApiState>>,
    Path(field_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.service.recommendations(&field_id).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize, Default)]
struct StopRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn stop_irrigation(
    State(state): State<Arc<ApiState>>,
    Path(field_id): Path<String>,
    body: Option<Json<StopRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = body
        .and_then(|Json(request)| request.reason)
        .unwrap_or_else(|| "operator request".to_string());
    let outcome = state.service.stop_irrigation(&field_id, &reason).await?;
    Ok(Json(outcome))
}
