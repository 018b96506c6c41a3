use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::Json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::api::{AnalyzeResponse, StatusResponse};
use crate::models::job::JobId;
use crate::services::upload::{self, UploadError};

/// POST /analyze: accept an image and start analyzing it in the background.
///
/// Responds as soon as the job exists; the inference call runs afterwards.
pub async fn submit_analysis(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| UploadError::Malformed(e.body_text()))?;

    let image = match upload::read_image(&mut multipart, state.max_upload_bytes).await {
        Ok(image) => image,
        Err(e) => {
            metrics::counter!("analysis_rejected_uploads_total").increment(1);
            tracing::info!(error = %e, "Rejected upload");
            return Err(e.into());
        }
    };

    let artifact = state
        .artifacts
        .persist(&image.bytes, image.kind)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to persist upload");
            ApiError::Artifact(e)
        })?;

    let id = match state.store.create(&artifact.reference()).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create analysis job");
            state.artifacts.discard(artifact).await;
            return Err(ApiError::JobCreation(e));
        }
    };

    tracing::info!(
        job_id = id,
        media_type = image.kind.media_type(),
        bytes = image.bytes.len(),
        file_name = image.file_name.as_deref().unwrap_or(""),
        "Analysis job submitted"
    );
    metrics::counter!("analysis_jobs_submitted_total").increment(1);

    state.workers.spawn(id, artifact, image.kind);

    Ok(Json(AnalyzeResponse { analysis_id: id }))
}

/// GET /analyze/{id}: current state of an analysis. Read-only.
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id: JobId = raw_id.parse().map_err(|_| ApiError::NotFound)?;

    let job = state
        .store
        .get(id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = id, error = %e, "Failed to load analysis job");
            ApiError::Internal(e)
        })?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(StatusResponse::from(job.state)))
}
