pub mod apps;
pub mod run;
pub mod sessions;
pub mod sse;
pub mod types;

use axum::routing::{get, post};
use axum::Router;

use crate::server::state::AppState;

/// Build the agent API routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/apps/:app_name/users/:user_id/sessions/:session_id",
            post(sessions::create_handler).delete(sessions::delete_handler),
        )
        .route("/sessions", get(sessions::list_handler))
        .route("/run", post(run::handler))
        .route("/run_sse", post(run::sse_handler))
        .route("/list-apps", get(apps::list_handler))
        .route("/tools/reconnect", post(apps::reconnect_handler))
        .route("/health", get(apps::health_handler))
}
