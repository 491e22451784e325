use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use serde_json::{json, Value};

use queue_status_cell::{queue_status_routes, QueueTrackerService};

pub fn create_router(tracker: Arc<QueueTrackerService>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic queue API is running!" }))
        .route("/health", get(health))
        .nest("/queue", queue_status_routes(tracker))
}

async fn health() -> axum::Json<Value> {
    axum::Json(json!({ "status": "ok" }))
}
