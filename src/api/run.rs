use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::sse::sse_response;
use crate::api::types::{RunRequest, RunResponse};
use crate::error::Result;
use crate::event::EventStream;
use crate::server::state::AppState;

/// Header carrying the session id on streamed responses
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// POST /run - run a turn and return all of its events at once.
pub async fn handler(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>> {
    let (session_id, stream) = start_turn(&state, &request).await?;
    let response_events = stream.collect_all().await;

    Ok(Json(RunResponse {
        session_id,
        user_id: request.user_id,
        response_events,
    }))
}

/// POST /run_sse - run a turn and stream its events as they happen.
pub async fn sse_handler(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Response> {
    let (session_id, stream) = start_turn(&state, &request).await?;
    Ok(([(SESSION_ID_HEADER, session_id)], sse_response(stream)).into_response())
}

async fn start_turn(state: &AppState, request: &RunRequest) -> Result<(String, EventStream)> {
    let text = request.text()?;
    let (session_id, _) = state
        .runtime
        .create_or_get_session(
            &request.app_name,
            &request.user_id,
            request.session_id.as_deref(),
        )
        .await?;

    tracing::info!(session = %session_id, user = %request.user_id, "Turn requested");
    let stream = state
        .runtime
        .submit_turn(&session_id, &request.user_id, text)
        .await?;
    Ok((session_id, stream))
}
