use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use leafscan::app_state::AppState;
use leafscan::config::AppConfig;
use leafscan::db::{self, JobStore, MemoryJobStore, PgJobStore};
use leafscan::routes;
use leafscan::services::{
    artifacts::ArtifactStore, inference::GeminiClient, worker::WorkerSupervisor,
};

/// How long shutdown waits for running analyses to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing leafscan server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    // Job store: Postgres when configured, otherwise in-process
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, analysis jobs will not survive a restart");
            Arc::new(MemoryJobStore::new())
        }
    };

    // Transient upload storage
    let artifacts = Arc::new(ArtifactStore::new(config.upload_dir.clone()));
    artifacts
        .init()
        .await
        .expect("Failed to create upload directory");
    tracing::info!(upload_dir = %config.upload_dir.display(), "Upload directory ready");

    // Inference client
    tracing::info!(model = %config.gemini_model, "Initializing Gemini client");
    let inference = Arc::new(GeminiClient::new(
        &config.gemini_base_url,
        &config.gemini_model,
        &config.gemini_api_key,
    ));
    if config.inference_timeout().is_none() {
        tracing::warn!("INFERENCE_TIMEOUT_SECS not set, inference calls have no deadline");
    }

    let workers = WorkerSupervisor::new(
        Arc::clone(&store),
        Arc::clone(&artifacts),
        inference,
        config.inference_timeout(),
    );

    let state = AppState::new(store, artifacts, workers.clone(), config.max_upload_bytes);

    let app = routes::with_middleware(routes::api_routes(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    ));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    let running = workers.in_flight();
    if running > 0 {
        tracing::info!(running, "Waiting for running analyses to finish");
        if !workers.drain(SHUTDOWN_GRACE).await {
            tracing::warn!(
                running = workers.in_flight(),
                "Shutting down with analyses still running"
            );
        }
    }

    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
