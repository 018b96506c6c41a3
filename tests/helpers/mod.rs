//! Test helpers: an in-process app wired to the memory store and a scripted
//! inference service.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

use leafscan::app_state::AppState;
use leafscan::db::{JobStore, MemoryJobStore, StoreError, Transition};
use leafscan::models::analysis::AnalysisResult;
use leafscan::models::job::{AnalysisJob, JobId};
use leafscan::routes;
use leafscan::services::artifacts::ArtifactStore;
use leafscan::services::inference::{InferenceClient, InferenceError};
use leafscan::services::worker::WorkerSupervisor;

use crate::fixtures::ImageFixture;

pub const MAX_UPLOAD: usize = 5 * 1024 * 1024;
const BOUNDARY: &str = "leafscan-test-boundary";

/// What the fake inference service does for images carrying a marker.
#[derive(Clone)]
pub enum Reply {
    Json(&'static str),
    Fail(&'static str),
    Panic,
}

#[derive(Clone)]
struct Script {
    reply: Reply,
    gate: Option<Arc<Notify>>,
}

/// Inference double keyed by a marker string embedded in the image bytes.
#[derive(Default)]
pub struct FakeInference {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl FakeInference {
    pub fn on(&self, marker: &str, reply: Reply) {
        self.scripts.lock().unwrap().insert(
            marker.to_string(),
            Script { reply, gate: None },
        );
    }

    /// Like `on`, but the reply waits until the returned gate is notified.
    pub fn on_gated(&self, marker: &str, reply: Reply) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.scripts.lock().unwrap().insert(
            marker.to_string(),
            Script {
                reply,
                gate: Some(gate.clone()),
            },
        );
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn script_for(&self, image: &[u8]) -> Option<(String, Script)> {
        let text = String::from_utf8_lossy(image);
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| text.contains(marker.as_str()))
            .map(|(m, s)| (m.clone(), s.clone()))
    }
}

#[async_trait]
impl InferenceClient for FakeInference {
    async fn generate(
        &self,
        image: &[u8],
        _media_type: &str,
        instruction: &str,
    ) -> Result<String, InferenceError> {
        assert!(!instruction.is_empty());
        let Some((marker, script)) = self.script_for(image) else {
            return Err(InferenceError::Empty);
        };
        self.calls.lock().unwrap().push(marker);

        if let Some(gate) = script.gate {
            gate.notified().await;
        }

        match script.reply {
            Reply::Json(text) => Ok(text.to_string()),
            Reply::Fail(message) => Err(InferenceError::Api {
                status: 503,
                body: message.to_string(),
            }),
            Reply::Panic => panic!("inference double panicked"),
        }
    }
}

/// Job store whose database is unreachable.
pub struct UnavailableStore;

#[async_trait]
impl JobStore for UnavailableStore {
    async fn create(&self, _: &str) -> Result<JobId, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn get(&self, _: JobId) -> Result<Option<AnalysisJob>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn complete(&self, _: JobId, _: &AnalysisResult) -> Result<Transition, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn fail(&self, _: JobId, _: &str) -> Result<Transition, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

/// A running app plus handles on everything behind it.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub inference: Arc<FakeInference>,
    pub upload_dir: tempfile::TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryJobStore::new()))
    }

    pub fn with_store(store: Arc<dyn JobStore>) -> Self {
        let upload_dir = tempfile::tempdir().expect("tempdir");
        let artifacts = Arc::new(ArtifactStore::new(upload_dir.path()));
        let inference = Arc::new(FakeInference::default());
        let workers = WorkerSupervisor::new(
            Arc::clone(&store),
            Arc::clone(&artifacts),
            inference.clone(),
            Some(Duration::from_secs(5)),
        );
        let state = AppState::new(store, artifacts, workers, MAX_UPLOAD);

        Self {
            router: routes::router(state.clone()),
            state,
            inference,
            upload_dir,
        }
    }

    /// Wait for every background job to finish.
    pub async fn settle(&self) {
        assert!(
            self.state.workers.drain(Duration::from_secs(5)).await,
            "workers did not finish in time"
        );
    }

    /// Files currently in the upload directory.
    pub fn uploads(&self) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(self.upload_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    pub async fn submit(&self, image: &ImageFixture) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri("/analyze")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body("image", image)))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Submit and return the new analysis id, asserting acceptance.
    pub async fn submit_ok(&self, image: &ImageFixture) -> i64 {
        let response = self.submit(image).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        body["analysisId"].as_i64().expect("analysisId")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn status(&self, id: i64) -> (StatusCode, serde_json::Value) {
        let response = self.get(&format!("/analyze/{}", id)).await;
        let status = response.status();
        (status, body_json(response).await)
    }
}

/// Hand-rolled multipart body with a single file field.
pub fn multipart_body(field: &str, image: &ImageFixture) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, image.file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", image.content_type).as_bytes());
    body.extend_from_slice(&image.bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
