use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod analyze;
pub mod health;
pub mod metrics;

/// Build the API router with its middleware stack.
pub fn router(state: AppState) -> Router {
    with_middleware(api_routes(state))
}

/// The API routes without middleware, for callers that mount extra routes
/// before the layers go on.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/analyze", axum::routing::post(analyze::submit_analysis))
        .route("/analyze/{id}", get(analyze::get_analysis))
        .with_state(state)
}

pub fn with_middleware(router: Router) -> Router {
    // Upload size is enforced while the image field streams in, so oversize
    // bodies get the same JSON 400 as every other validation failure.
    router
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
