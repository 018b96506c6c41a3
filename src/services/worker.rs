use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;

use super::artifacts::{Artifact, ArtifactError, ArtifactLease, ArtifactStore};
use super::inference::{decode_result, InferenceClient, InferenceError, INSTRUCTION};
use super::upload::ImageKind;
use crate::db::{JobStore, Transition};
use crate::models::analysis::AnalysisResult;
use crate::models::job::JobId;

/// Recorded on a job whose worker panicked or was cancelled.
pub const WORKER_ABORTED_MESSAGE: &str = "Analysis stopped unexpectedly, please submit the image again";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Could not read uploaded image: {0}")]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

struct Shared {
    store: Arc<dyn JobStore>,
    artifacts: Arc<ArtifactStore>,
    inference: Arc<dyn InferenceClient>,
    inference_timeout: Option<Duration>,
}

/// Runs one background analysis per job and makes sure every job reaches a
/// terminal state and releases its upload, even when the worker panics.
#[derive(Clone)]
pub struct WorkerSupervisor {
    shared: Arc<Shared>,
    tracker: TaskTracker,
}

impl WorkerSupervisor {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<ArtifactStore>,
        inference: Arc<dyn InferenceClient>,
        inference_timeout: Option<Duration>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                artifacts,
                inference,
                inference_timeout,
            }),
            tracker: TaskTracker::new(),
        }
    }

    /// Start analyzing `artifact` for job `id`. Returns immediately.
    pub fn spawn(&self, id: JobId, artifact: Artifact, kind: ImageKind) {
        let lease = Arc::new(ArtifactLease::new(artifact));
        let shared = Arc::clone(&self.shared);

        metrics::gauge!("analysis_jobs_in_flight").increment(1.0);
        let worker = tokio::spawn(run_job(Arc::clone(&shared), id, kind, Arc::clone(&lease)));

        self.tracker.spawn(async move {
            if let Err(err) = worker.await {
                tracing::error!(
                    job_id = id,
                    panicked = err.is_panic(),
                    error = %err,
                    "Analysis worker aborted"
                );
                if shared.record(id, Outcome::Aborted).await {
                    shared.artifacts.release(&lease).await;
                } else {
                    keep_artifact(id, &lease);
                }
            }
            metrics::gauge!("analysis_jobs_in_flight").decrement(1.0);
        });
    }

    /// Number of jobs still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every spawned job has finished, up to `limit`.
    /// Returns false if jobs were still running when the limit expired.
    pub async fn drain(&self, limit: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(limit, self.tracker.wait()).await.is_ok();
        self.tracker.reopen();
        drained
    }
}

enum Outcome {
    Analyzed(Result<AnalysisResult, AnalysisError>),
    Aborted,
}

async fn run_job(shared: Arc<Shared>, id: JobId, kind: ImageKind, lease: Arc<ArtifactLease>) {
    tracing::info!(job_id = id, artifact = %lease.path().display(), "Analyzing image");

    let started = Instant::now();
    let analyzed = shared.analyze(lease.path(), kind).await;
    let elapsed = started.elapsed();
    metrics::histogram!("analysis_inference_seconds").record(elapsed.as_secs_f64());

    match &analyzed {
        Ok(result) => tracing::info!(
            job_id = id,
            subject = %result.subject,
            findings = result.findings.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Analysis completed"
        ),
        Err(e) => tracing::warn!(
            job_id = id,
            error = %e,
            duration_ms = elapsed.as_millis() as u64,
            "Analysis failed"
        ),
    }

    // The job row is written before the upload is removed.
    if shared.record(id, Outcome::Analyzed(analyzed)).await {
        shared.artifacts.release(&lease).await;
    } else {
        keep_artifact(id, &lease);
    }
}

/// The job is still `processing`, so its input stays on disk for a later retry or cleanup.
fn keep_artifact(id: JobId, lease: &ArtifactLease) {
    tracing::error!(
        job_id = id,
        artifact = %lease.path().display(),
        "Outcome not recorded, keeping upload"
    );
}

impl Shared {
    async fn analyze(&self, path: &Path, kind: ImageKind) -> Result<AnalysisResult, AnalysisError> {
        let image = self.artifacts.read(path).await?;
        let call = self.inference.generate(&image, kind.media_type(), INSTRUCTION);

        let raw = match self.inference_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| InferenceError::Timeout(limit.as_secs()))??,
            None => call.await?,
        };

        Ok(decode_result(&raw)?)
    }

    /// Write the terminal state. Returns whether the job is now terminal.
    async fn record(&self, id: JobId, outcome: Outcome) -> bool {
        let (written, attempted, counter) = match outcome {
            Outcome::Analyzed(Ok(result)) => (
                self.store.complete(id, &result).await,
                "completed",
                "analysis_jobs_completed_total",
            ),
            Outcome::Analyzed(Err(e)) => (
                self.store.fail(id, &e.to_string()).await,
                "error",
                "analysis_jobs_failed_total",
            ),
            Outcome::Aborted => (
                self.store.fail(id, WORKER_ABORTED_MESSAGE).await,
                "error",
                "analysis_jobs_failed_total",
            ),
        };

        match written {
            Ok(Transition::Applied) => {
                metrics::counter!(counter).increment(1);
                true
            }
            Ok(Transition::AlreadyTerminal) => {
                tracing::error!(
                    job_id = id,
                    attempted,
                    "Job already terminal, second terminal write ignored"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    job_id = id,
                    attempted,
                    error = %e,
                    "Failed to record analysis outcome"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryJobStore, StoreError};
    use crate::models::job::{AnalysisJob, JobState};
    use async_trait::async_trait;

    enum Behaviour {
        Reply(&'static str),
        Panic,
        Hang,
    }

    const TOMATO: &str =
        r#"{"subject":"Tomato","findings":[{"label":"Healthy","confidence":0.95,"remedy":"None"}]}"#;

    struct StubInference(Behaviour);

    #[async_trait]
    impl InferenceClient for StubInference {
        async fn generate(&self, _: &[u8], _: &str, _: &str) -> Result<String, InferenceError> {
            match self.0 {
                Behaviour::Reply(text) => Ok(text.to_string()),
                Behaviour::Panic => panic!("model client exploded"),
                Behaviour::Hang => std::future::pending().await,
            }
        }
    }

    /// Memory store whose terminal writes always fail.
    struct BrokenWrites(MemoryJobStore);

    #[async_trait]
    impl JobStore for BrokenWrites {
        async fn create(&self, artifact_ref: &str) -> Result<JobId, StoreError> {
            self.0.create(artifact_ref).await
        }

        async fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError> {
            self.0.get(id).await
        }

        async fn complete(&self, _: JobId, _: &AnalysisResult) -> Result<Transition, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn fail(&self, _: JobId, _: &str) -> Result<Transition, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<MemoryJobStore>,
        artifacts: Arc<ArtifactStore>,
        workers: WorkerSupervisor,
    }

    fn harness(behaviour: Behaviour, timeout: Option<Duration>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(ArtifactStore::new(dir.path()));
        let workers = WorkerSupervisor::new(
            store.clone(),
            artifacts.clone(),
            Arc::new(StubInference(behaviour)),
            timeout,
        );
        Harness {
            _dir: dir,
            store,
            artifacts,
            workers,
        }
    }

    async fn submit(h: &Harness) -> (JobId, std::path::PathBuf) {
        let artifact = h.artifacts.persist(b"image", ImageKind::Jpeg).await.unwrap();
        let path = artifact.path().to_path_buf();
        let id = h.store.create(&artifact.reference()).await.unwrap();
        h.workers.spawn(id, artifact, ImageKind::Jpeg);
        (id, path)
    }

    async fn state_of(h: &Harness, id: JobId) -> JobState {
        h.store.get(id).await.unwrap().unwrap().state
    }

    #[tokio::test]
    async fn test_success_completes_and_removes_upload() {
        let h = harness(Behaviour::Reply(TOMATO), None);
        let (id, path) = submit(&h).await;
        assert!(h.workers.drain(Duration::from_secs(5)).await);

        match state_of(&h, id).await {
            JobState::Completed(result) => assert_eq!(result.subject, "Tomato"),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_nonconforming_output_fails_job() {
        let h = harness(Behaviour::Reply(r#"{"subject":"Tomato","findings":[]}"#), None);
        let (id, path) = submit(&h).await;
        assert!(h.workers.drain(Duration::from_secs(5)).await);

        match state_of(&h, id).await {
            JobState::Error(message) => assert!(message.contains("expected shape")),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_panicking_worker_is_contained() {
        let h = harness(Behaviour::Panic, None);
        let (id, path) = submit(&h).await;
        assert!(h.workers.drain(Duration::from_secs(5)).await);

        assert_eq!(
            state_of(&h, id).await,
            JobState::Error(WORKER_ABORTED_MESSAGE.to_string())
        );
        assert!(!path.exists());
        assert_eq!(h.workers.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_inference_deadline_fails_job() {
        let h = harness(Behaviour::Hang, Some(Duration::from_millis(50)));
        let (id, path) = submit(&h).await;
        assert!(h.workers.drain(Duration::from_secs(5)).await);

        match state_of(&h, id).await {
            JobState::Error(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_upload_fails_job() {
        let h = harness(Behaviour::Reply("{}"), None);
        let artifact = h.artifacts.persist(b"image", ImageKind::Png).await.unwrap();
        std::fs::remove_file(artifact.path()).unwrap();
        let id = h.store.create(&artifact.reference()).await.unwrap();
        h.workers.spawn(id, artifact, ImageKind::Png);
        assert!(h.workers.drain(Duration::from_secs(5)).await);

        match state_of(&h, id).await {
            JobState::Error(message) => assert!(message.starts_with("Could not read uploaded image")),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unrecorded_outcome_keeps_upload() {
        for behaviour in [Behaviour::Reply(TOMATO), Behaviour::Panic] {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(BrokenWrites(MemoryJobStore::new()));
            let artifacts = Arc::new(ArtifactStore::new(dir.path()));
            let workers = WorkerSupervisor::new(
                store.clone(),
                artifacts.clone(),
                Arc::new(StubInference(behaviour)),
                None,
            );

            let artifact = artifacts.persist(b"image", ImageKind::Jpeg).await.unwrap();
            let path = artifact.path().to_path_buf();
            let id = store.create(&artifact.reference()).await.unwrap();
            workers.spawn(id, artifact, ImageKind::Jpeg);
            assert!(workers.drain(Duration::from_secs(5)).await);

            assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Processing);
            assert!(path.exists(), "upload removed although the job is still processing");
        }
    }
}
