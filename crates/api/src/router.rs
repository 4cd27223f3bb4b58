//! Route table and middleware.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Workflows
        .route(
            "/workflows",
            get(handlers::workflows::list).post(handlers::workflows::create),
        )
        .route("/workflows/{id}", get(handlers::workflows::get))
        .route("/workflows/{id}/execute", post(handlers::workflows::execute))
        .route("/workflows/{id}/schedule", post(handlers::workflows::schedule))
        // Executions
        .route("/executions/{id}", get(handlers::executions::get))
        // Tasks
        .route(
            "/tasks",
            get(handlers::tasks::list).post(handlers::tasks::create),
        )
        .route("/tasks/drain/{task_type}", post(handlers::tasks::drain))
        .route("/tasks/{id}/resubmit", post(handlers::tasks::resubmit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
