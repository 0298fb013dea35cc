use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::types::{SessionListResponse, SessionResponse};
use crate::error::{AgentError, Result};
use crate::server::state::AppState;

/// POST /apps/:app_name/users/:user_id/sessions/:session_id
pub async fn create_handler(
    State(state): State<AppState>,
    Path((app_name, user_id, session_id)): Path<(String, String, String)>,
) -> Result<Json<SessionResponse>> {
    let (session_id, created) = state
        .runtime
        .create_or_get_session(&app_name, &user_id, Some(&session_id))
        .await?;
    let message = if created {
        "Session created"
    } else {
        "Session already exists"
    };
    Ok(Json(SessionResponse {
        message: message.to_string(),
        session_id,
    }))
}

/// DELETE /apps/:app_name/users/:user_id/sessions/:session_id
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((_app_name, _user_id, session_id)): Path<(String, String, String)>,
) -> Result<StatusCode> {
    if state.runtime.end_session(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AgentError::SessionNotFound(session_id))
    }
}

/// GET /sessions
pub async fn list_handler(State(state): State<AppState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.runtime.list_sessions().await,
    })
}
