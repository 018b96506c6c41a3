//! HTTP client for the analysis API and the polling loop that drives it.

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::{Client, StatusCode};
use std::path::Path;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::models::api::{AnalyzeResponse, ErrorBody, StatusResponse};
use crate::models::job::JobId;
use crate::services::upload::{self, ImageKind, UploadError};

pub mod poller;

pub use poller::{PollConfig, PollObserver, Poller, PollerState};

/// The two calls the poller needs from the server.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    async fn submit(&self, image: &ImageFile) -> Result<JobId, ClientError>;

    async fn status(&self, id: JobId) -> Result<StatusResponse, ClientError>;
}

/// An image read from disk and checked locally before upload.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub kind: ImageKind,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    /// Read and pre-validate an image, rejecting what the server would reject anyway.
    pub async fn load(path: &Path) -> Result<Self, ClientError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        let kind = ImageKind::from_file_name(&file_name).ok_or(UploadError::UnsupportedType)?;
        let bytes = tokio::fs::read(path).await?;
        upload::validate_image(
            Some(kind.media_type()),
            Some(&file_name),
            &bytes,
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;

        Ok(Self {
            file_name,
            kind,
            bytes,
        })
    }

    /// Size in megabytes with two decimals, e.g. "1.25 MB".
    pub fn size_label(&self) -> String {
        format!("{:.2} MB", self.bytes.len() as f64 / (1024.0 * 1024.0))
    }
}

/// reqwest-backed client for `POST /analyze` and `GET /analyze/{id}`.
pub struct AnalysisClient {
    http: Client,
    base_url: String,
}

impl AnalysisClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

async fn rejection(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    };
    ClientError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl AnalysisApi for AnalysisClient {
    async fn submit(&self, image: &ImageFile) -> Result<JobId, ClientError> {
        let form = multipart::Form::new().part(
            upload::IMAGE_FIELD,
            multipart::Part::bytes(image.bytes.clone())
                .file_name(image.file_name.clone())
                .mime_str(image.kind.media_type())?,
        );

        let response = self
            .http
            .post(format!("{}/analyze", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: AnalyzeResponse = response.json().await?;
        Ok(body.analysis_id)
    }

    async fn status(&self, id: JobId) -> Result<StatusResponse, ClientError> {
        let response = self
            .http
            .get(format!("{}/analyze/{}", self.base_url, id))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound),
            s if s.is_success() => Ok(response.json().await?),
            _ => Err(rejection(response).await),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analysis not found")]
    NotFound,

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    InvalidImage(#[from] UploadError),

    #[error("Could not read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("An analysis is already running in this session")]
    Busy,
}
