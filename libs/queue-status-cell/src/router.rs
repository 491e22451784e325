use std::sync::Arc;

use axum::{routing::get, Router};

use crate::handlers::*;
use crate::services::QueueTrackerService;

pub fn queue_status_routes(tracker: Arc<QueueTrackerService>) -> Router {
    Router::new()
        .route("/", get(list_tracked_appointments))
        .route(
            "/{appointment_id}",
            get(get_queue_status).delete(unsubscribe_queue_status),
        )
        .route("/{appointment_id}/stream", get(stream_queue_status))
        .with_state(tracker)
}
