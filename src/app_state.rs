use std::sync::Arc;

use crate::db::JobStore;
use crate::services::{artifacts::ArtifactStore, worker::WorkerSupervisor};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub artifacts: Arc<ArtifactStore>,
    pub workers: WorkerSupervisor,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<ArtifactStore>,
        workers: WorkerSupervisor,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            artifacts,
            workers,
            max_upload_bytes,
        }
    }
}
