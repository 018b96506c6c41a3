use serde::{Deserialize, Serialize};

use super::analysis::AnalysisResult;
use super::job::{JobId, JobState};

/// Response after accepting an image for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(rename = "analysisId")]
    pub analysis_id: JobId,
}

/// Response for querying an analysis.
///
/// Serialized flat: `{"status":"completed","subject":...,"findings":[...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusResponse {
    Processing,
    Completed(AnalysisResult),
    Error { error: String },
}

impl From<JobState> for StatusResponse {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Processing => StatusResponse::Processing,
            JobState::Completed(result) => StatusResponse::Completed(result),
            JobState::Error(error) => StatusResponse::Error { error },
        }
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
