//! HTTP server: an axum router over a shared [`AgentRuntime`].

pub mod router;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::runtime::AgentRuntime;

/// Serve the agent API on `bind` until `shutdown` resolves.
pub async fn start(
    runtime: Arc<AgentRuntime>,
    bind: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router::build(state::AppState::new(runtime));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| AgentError::Config(format!("failed to bind {}: {}", bind, e)))?;

    tracing::info!("Agent server listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(AgentError::Io)?;

    tracing::info!("Agent server stopped");
    Ok(())
}
