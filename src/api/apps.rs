use axum::extract::State;
use axum::Json;

use crate::api::types::AppsResponse;
use crate::error::Result;
use crate::server::state::AppState;

/// GET /list-apps - app name and the tools currently on offer.
pub async fn list_handler(State(state): State<AppState>) -> Json<AppsResponse> {
    let app_name = state.runtime.app_name().to_string();
    match state.runtime.list_capabilities().await {
        Ok(available_tools) => Json(AppsResponse {
            status: "active".to_string(),
            app_name,
            available_tools,
            message: "Agent server is operational".to_string(),
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Tool server unavailable");
            Json(AppsResponse {
                status: "degraded".to_string(),
                app_name,
                available_tools: Vec::new(),
                message: e.to_string(),
            })
        }
    }
}

/// POST /tools/reconnect - replace a lost tool server connection.
pub async fn reconnect_handler(State(state): State<AppState>) -> Result<Json<AppsResponse>> {
    state.runtime.reconnect_tools().await?;
    let available_tools = state.runtime.list_capabilities().await?;
    Ok(Json(AppsResponse {
        status: "active".to_string(),
        app_name: state.runtime.app_name().to_string(),
        available_tools,
        message: "Tool server reconnected".to_string(),
    }))
}

/// GET /health
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
