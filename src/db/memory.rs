use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use super::{JobStore, StoreError, Transition};
use crate::models::analysis::AnalysisResult;
use crate::models::job::{AnalysisJob, JobId, JobState};

/// In-process job store. Same transition rules as the Postgres store, nothing survives a restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, AnalysisJob>>,
    last_id: AtomicI64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn finish(&self, id: JobId, state: JobState) -> Result<Transition, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if job.status().is_terminal() {
            return Ok(Transition::AlreadyTerminal);
        }
        job.state = state;
        job.updated_at = Utc::now();
        Ok(Transition::Applied)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, artifact_ref: &str) -> Result<JobId, StoreError> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let job = AnalysisJob {
            id,
            state: JobState::Processing,
            artifact_ref: artifact_ref.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.jobs.write().await.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn complete(&self, id: JobId, result: &AnalysisResult) -> Result<Transition, StoreError> {
        self.finish(id, JobState::Completed(result.clone())).await
    }

    async fn fail(&self, id: JobId, message: &str) -> Result<Transition, StoreError> {
        self.finish(id, JobState::Error(message.to_string())).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
