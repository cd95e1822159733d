//! GET /api/projects/watch: server-sent change events for one project.

use super::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchQuery {
    pub project_id: Option<String>,
}

pub async fn handle_watch(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> Response {
    let project_id = match query.project_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "projectId is required" })),
            )
                .into_response();
        }
    };

    tracing::info!("Opening change stream for project {project_id}");
    let frames = state.streams.open(project_id);
    let stream = ReceiverStream::new(frames).map(|frame| {
        let data = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".into());
        Ok::<_, Infallible>(Event::default().event(frame.event_name()).data(data))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
