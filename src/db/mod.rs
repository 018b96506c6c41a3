use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{AnalysisJob, JobId};

pub mod memory;
pub mod queries;

pub use memory::MemoryJobStore;
pub use queries::PgJobStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Outcome of a terminal write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The job had already left `processing`; nothing was written.
    AlreadyTerminal,
}

/// Persistent record of analysis jobs. Owns every state transition.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate a new job in `processing`.
    async fn create(&self, artifact_ref: &str) -> Result<JobId, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError>;

    async fn complete(&self, id: JobId, result: &AnalysisResult) -> Result<Transition, StoreError>;

    async fn fail(&self, id: JobId, message: &str) -> Result<Transition, StoreError>;

    /// Connectivity check for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Analysis job {0} does not exist")]
    NotFound(JobId),

    #[error("Analysis job {id} has an inconsistent row: {reason}")]
    Corrupt { id: JobId, reason: String },
}
