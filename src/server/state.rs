use std::sync::Arc;

use crate::runtime::AgentRuntime;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
}

impl AppState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}
