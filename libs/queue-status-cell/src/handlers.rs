use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use axum_extra::TypedHeader;
use futures::stream::{self, Stream};
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::{info, warn};

use shared_models::AppError;

use crate::models::QueueStatus;
use crate::services::QueueTrackerService;

/// Current queue status for an appointment, starting tracking if needed.
#[axum::debug_handler]
pub async fn get_queue_status(
    State(tracker): State<Arc<QueueTrackerService>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<String>,
) -> Result<Json<QueueStatus>, AppError> {
    let status = tracker.current_status(&appointment_id, auth.token()).await?;
    Ok(Json(status))
}

/// Server-sent events carrying every published status until the
/// subscription is stopped.
pub async fn stream_queue_status(
    State(tracker): State<Arc<QueueTrackerService>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let rx = tracker.subscribe(&appointment_id, auth.token()).await?;
    info!("Opening queue status stream for appointment {}", appointment_id);

    let events = stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }

        let status = *rx.borrow_and_update();
        match Event::default().event("queue_status").json_data(status) {
            Ok(event) => Some((Ok::<Event, Infallible>(event), (rx, false))),
            Err(e) => {
                warn!("Failed to encode queue status event: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[axum::debug_handler]
pub async fn unsubscribe_queue_status(
    State(tracker): State<Arc<QueueTrackerService>>,
    TypedHeader(_auth): TypedHeader<Authorization<Bearer>>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    tracker.unsubscribe(&appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment_id": appointment_id,
    })))
}

#[axum::debug_handler]
pub async fn list_tracked_appointments(
    State(tracker): State<Arc<QueueTrackerService>>,
    TypedHeader(_auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let tracked = tracker.active_appointments().await;

    Ok(Json(json!({
        "appointments": tracked,
        "total": tracked.len(),
    })))
}
