use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ErrorReport, StageError};
use crate::kernel::SolidKernel;
use crate::models::{Design, DesignEvent, DesignId};
use crate::pipeline::{Created, DesignView, Exported, Pipeline, Refined};

// ============================================================
// Error Handling
// ============================================================

type ApiError = (StatusCode, Json<ErrorReport>);

/// Maps a flow failure to a status code. Storage failures are logged in
/// full and reported without internal detail.
fn stage_error(err: StageError) -> ApiError {
    let status = match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::DesignBusy => StatusCode::CONFLICT,
        ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::SchemaViolation
        | ErrorKind::ProgramInvalid
        | ErrorKind::GrammarViolation
        | ErrorKind::ValidationFailed
        | ErrorKind::UnresolvedTarget => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::CorruptPlan | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut report = err.report();
    if status.is_server_error() && err.kind() == ErrorKind::Storage {
        tracing::error!("Internal error: {}", err);
        report.message = "Internal storage error".to_string();
    } else {
        tracing::warn!("Request failed: {}", err);
    }
    (status, Json(report))
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Designs
// ============================================================

#[derive(Debug, Deserialize)]
pub struct CreateDesignRequest {
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct RefineDesignRequest {
    pub request: String,
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub design_id: DesignId,
    pub version_id: String,
}

pub async fn list_designs<K: SolidKernel>(
    State(pipeline): State<Pipeline<K>>,
) -> Result<Json<Vec<Design>>, ApiError> {
    pipeline.list().map(Json).map_err(stage_error)
}

pub async fn create_design<K: SolidKernel>(
    State(pipeline): State<Pipeline<K>>,
    Json(input): Json<CreateDesignRequest>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    pipeline
        .create(&input.description)
        .await
        .map(|created| (StatusCode::CREATED, Json(created)))
        .map_err(stage_error)
}

pub async fn get_design<K: SolidKernel>(
    State(pipeline): State<Pipeline<K>>,
    Path(id): Path<DesignId>,
) -> Result<Json<DesignView>, ApiError> {
    pipeline.show(&id).map(Json).map_err(stage_error)
}

pub async fn refine_design<K: SolidKernel>(
    State(pipeline): State<Pipeline<K>>,
    Path(id): Path<DesignId>,
    Json(input): Json<RefineDesignRequest>,
) -> Result<Json<Refined>, ApiError> {
    pipeline
        .refine(&id, &input.request)
        .await
        .map(Json)
        .map_err(stage_error)
}

pub async fn export_design<K: SolidKernel>(
    State(pipeline): State<Pipeline<K>>,
    Path(id): Path<DesignId>,
) -> Result<Json<Exported>, ApiError> {
    pipeline.export(&id).await.map(Json).map_err(stage_error)
}

pub async fn snapshot_design<K: SolidKernel>(
    State(pipeline): State<Pipeline<K>>,
    Path(id): Path<DesignId>,
) -> Result<(StatusCode, Json<SnapshotResponse>), ApiError> {
    let version_id = pipeline.snapshot(&id).map_err(stage_error)?;
    Ok((
        StatusCode::CREATED,
        Json(SnapshotResponse {
            design_id: id,
            version_id,
        }),
    ))
}

pub async fn get_history<K: SolidKernel>(
    State(pipeline): State<Pipeline<K>>,
    Path(id): Path<DesignId>,
) -> Result<Json<Vec<DesignEvent>>, ApiError> {
    pipeline.history(&id).map(Json).map_err(stage_error)
}
