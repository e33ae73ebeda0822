//! Router configuration for the web server.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::handle_panic;
use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    let router = Router::new()
        .route("/", get(handlers::index))
        // Tasks
        .route("/tasks", get(handlers::list_tasks).post(handlers::submit_task))
        .route(
            "/tasks/:task_id",
            get(handlers::get_task).delete(handlers::delete_task),
        )
        .route("/tasks/:task_id/artifacts", get(handlers::get_artifacts))
        .route(
            "/tasks/:task_id/artifacts/:name",
            get(handlers::get_artifact),
        )
        .route("/process", post(handlers::process_and_return))
        // Status
        .route("/health", get(handlers::health))
        .route("/gpu_status", get(handlers::gpu_status))
        // Legacy paths
        .route("/upload_and_process_pdf", post(handlers::submit_task))
        .route("/process_pdf_and_return", post(handlers::process_and_return))
        .route("/get_results/:task_id", get(handlers::get_artifacts))
        .route("/get_markdown/:task_id", get(handlers::get_markdown))
        .route("/get_content_list/:task_id", get(handlers::get_content_list))
        .route("/get_middle_json/:task_id", get(handlers::get_middle_json))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state);

    with_middleware(router)
}

/// Cross-cutting layers: panic boundary, request tracing, CORS.
pub(crate) fn with_middleware(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
