use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::db::StoreError;
use crate::models::api::ErrorBody;
use crate::services::artifacts::ArtifactError;
use crate::services::upload::UploadError;

/// Errors surfaced by HTTP handlers. Always rendered as `{"error": ...}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] UploadError),

    #[error("Failed to store uploaded image")]
    Artifact(#[source] ArtifactError),

    #[error("Failed to create analysis job")]
    JobCreation(#[source] StoreError),

    #[error("Analysis not found")]
    NotFound,

    #[error("Internal server error")]
    Internal(#[source] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Artifact(_) | ApiError::JobCreation(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
