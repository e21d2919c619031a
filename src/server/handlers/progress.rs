use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{sse::Event, IntoResponse, Json, Sse},
};
use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tokio_stream::{wrappers::IntervalStream, Stream, StreamExt};
use tracing::{error, info};

use crate::progress::ProjectSnapshot;
use crate::server::app::AppState;
use crate::services::MigrationService;

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event_type: String,
    pub project_id: i32,
    pub timestamp: String,
    pub data: ProjectSnapshot,
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ProjectSnapshot>, StatusCode> {
    state
        .service
        .get_project(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    match state.service.snapshot(id).await {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(e) => {
            error!(project_id = id, "Failed to build progress snapshot: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Stream progress snapshots via Server-Sent Events, one per second.
pub async fn stream_progress(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, StatusCode> {
    info!(project_id = id, "Starting SSE progress stream");

    state
        .service
        .get_project(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let stream = create_progress_stream(state.service.clone(), id);

    Ok(Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive-text"),
    ))
}

fn create_progress_stream(
    service: MigrationService,
    project_id: i32,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let stream = IntervalStream::new(interval(Duration::from_millis(1000)));

    stream
        .map(move |_| {
            let service = service.clone();

            async move {
                if let Ok(snapshot) = service.snapshot(project_id).await {
                    let progress_event = ProgressEvent {
                        event_type: "progress".to_string(),
                        project_id,
                        timestamp: chrono::Utc::now().to_rfc3339(),
                        data: snapshot,
                    };
                    if let Ok(json_data) = serde_json::to_string(&progress_event) {
                        return Event::default().data(json_data);
                    }
                }

                Event::default().data("heartbeat")
            }
        })
        .then(|fut| fut)
        .map(Ok)
}
