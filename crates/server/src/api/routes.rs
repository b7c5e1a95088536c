use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, items, manifests, middleware::metrics_middleware, targets};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and status
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        .route("/metrics", get(handlers::get_metrics))
        // Items
        .route("/items", post(items::create_item))
        .route("/items", get(items::list_items))
        .route("/items/{id}", get(items::get_item))
        .route("/items/{id}", delete(items::delete_item))
        .route("/items/{id}/pause", post(items::pause_item))
        .route("/items/{id}/resume", post(items::resume_item))
        .route("/items/{id}/cancel", post(items::cancel_item))
        // Manifests
        .route("/manifests/m3u", post(manifests::ingest_m3u))
        // Targets
        .route("/targets", get(targets::list_targets))
        .route("/targets/{name}/test", post(targets::test_target))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
