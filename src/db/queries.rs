use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use super::{JobStore, StoreError, Transition};
use crate::models::analysis::AnalysisResult;
use crate::models::job::{AnalysisJob, JobId, JobState, JobStatus};

/// Job store backed by the `analysis_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: JobId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM analysis_jobs WHERE id = $1) AS found")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("found")?)
    }

    /// Zero rows touched means the job was already terminal, or never existed.
    async fn transition_from(&self, id: JobId, rows_affected: u64) -> Result<Transition, StoreError> {
        if rows_affected > 0 {
            return Ok(Transition::Applied);
        }
        if self.exists(id).await? {
            Ok(Transition::AlreadyTerminal)
        } else {
            Err(StoreError::NotFound(id))
        }
    }
}

fn job_from_row(row: &PgRow) -> Result<AnalysisJob, StoreError> {
    let id: JobId = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|_| StoreError::Corrupt {
        id,
        reason: format!("unknown status '{}'", status_str),
    })?;
    let result: Option<Json<AnalysisResult>> = row.try_get("result")?;
    let error: Option<String> = row.try_get("error_message")?;

    let state = match (status, result, error) {
        (JobStatus::Processing, None, None) => JobState::Processing,
        (JobStatus::Completed, Some(Json(result)), None) => JobState::Completed(result),
        (JobStatus::Error, None, Some(message)) => JobState::Error(message),
        (status, _, _) => {
            return Err(StoreError::Corrupt {
                id,
                reason: format!("payload columns do not match status '{}'", status),
            })
        }
    };

    Ok(AnalysisJob {
        id,
        state,
        artifact_ref: row.try_get("artifact_ref")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, artifact_ref: &str) -> Result<JobId, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO analysis_jobs (status, artifact_ref)
            VALUES ('processing', $1)
            RETURNING id
            "#,
        )
        .bind(artifact_ref)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, result, error_message, artifact_ref, created_at, updated_at
            FROM analysis_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn complete(&self, id: JobId, result: &AnalysisResult) -> Result<Transition, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'completed',
                result = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(Json(result))
        .execute(&self.pool)
        .await?;

        self.transition_from(id, done.rows_affected()).await
    }

    async fn fail(&self, id: JobId, message: &str) -> Result<Transition, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'error',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        self.transition_from(id, done.rows_affected()).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
