use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::analysis::AnalysisResult;

/// Job identifiers are assigned monotonically by the job store.
pub type JobId = i64;

/// Status of an analysis job.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Where a job is in its lifecycle. A result and an error message can never coexist.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Processing,
    Completed(AnalysisResult),
    Error(String),
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Processing => JobStatus::Processing,
            JobState::Completed(_) => JobStatus::Completed,
            JobState::Error(_) => JobStatus::Error,
        }
    }
}

/// One submitted image and its analysis outcome.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub id: JobId,
    pub state: JobState,
    /// Location of the uploaded image while the job runs. Never sent to clients.
    pub artifact_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }
}
