//! Process-scoped runtime
//!
//! [`AgentRuntime`] owns the session store, the shared tool backend, and
//! the turn runner. Transports (HTTP, console) are handed an
//! `Arc<AgentRuntime>` and talk to it only through the operations below.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::event::EventStream;
use crate::llm::{GeminiClient, ModelOracle, ToolDefinition};
use crate::runner::{RunnerSettings, TurnRunner};
use crate::session::{Session, SessionInfo, SessionStore};
use crate::tool::{ToolBackend, ToolManager};

pub struct AgentRuntime {
    config: AgentConfig,
    sessions: SessionStore,
    tools: Arc<dyn ToolBackend>,
    runner: TurnRunner,
    shut_down: AtomicBool,
}

/// Builder for [`AgentRuntime`]. Without overrides the model is a
/// [`GeminiClient`] and the tools come from a [`ToolManager`].
pub struct AgentRuntimeBuilder {
    config: AgentConfig,
    oracle: Option<Arc<dyn ModelOracle>>,
    tools: Option<Arc<dyn ToolBackend>>,
}

impl AgentRuntimeBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            oracle: None,
            tools: None,
        }
    }

    pub fn oracle(mut self, oracle: Arc<dyn ModelOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn tools(mut self, tools: Arc<dyn ToolBackend>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn build(self) -> Result<AgentRuntime> {
        let config = self.config;
        config.validate()?;

        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => Arc::new(gemini_from_config(&config)?),
        };
        let tools = self
            .tools
            .unwrap_or_else(|| Arc::new(ToolManager::new(config.tool_server.clone())));

        let settings = RunnerSettings {
            max_rounds: config.runner.max_rounds,
            tool_timeout: config.tool_server.call_timeout(),
            instruction: Some(config.model.instruction.clone()).filter(|s| !s.trim().is_empty()),
        };
        let runner = TurnRunner::new(oracle, tools.clone(), settings);

        Ok(AgentRuntime {
            sessions: SessionStore::new(config.app_name.clone()),
            config,
            tools,
            runner,
            shut_down: AtomicBool::new(false),
        })
    }
}

fn gemini_from_config(config: &AgentConfig) -> Result<GeminiClient> {
    let api_key = config.model.api_key.clone().ok_or_else(|| {
        AgentError::Config("no model API key: set GOOGLE_API_KEY or model.api_key".to_string())
    })?;
    let mut client = GeminiClient::new(api_key, config.model.name.clone())
        .with_retry_config(config.model.retry.clone());
    if let Some(base_url) = &config.model.base_url {
        client = client.with_base_url(base_url);
    }
    Ok(client)
}

impl AgentRuntime {
    pub fn builder(config: AgentConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn app_name(&self) -> &str {
        &self.config.app_name
    }

    /// Launch the tool server now if configured to do so. A launch
    /// failure here is meant to stop the process.
    pub async fn start(&self) -> Result<()> {
        if !self.config.tool_server.connect_on_startup {
            tracing::info!("Tool server will launch on first use");
            return Ok(());
        }
        let tools = self.tools.capabilities().await?;
        tracing::info!(
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "Runtime started"
        );
        Ok(())
    }

    /// Resolve a session, creating it if needed. Generates an id when
    /// none is given. Returns the id and whether it was created.
    pub async fn create_or_get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<(String, bool)> {
        if user_id.trim().is_empty() {
            return Err(AgentError::InvalidInput("user id is empty".to_string()));
        }
        let session_id = match session_id {
            Some(id) if id.trim().is_empty() => {
                return Err(AgentError::InvalidInput("session id is empty".to_string()))
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let app_name = if app_name.trim().is_empty() {
            self.app_name()
        } else {
            app_name
        };

        let (session, created) = self
            .sessions
            .get_or_create_for_app(app_name, &session_id, user_id)
            .await;
        Ok((session.id().to_string(), created))
    }

    /// Start a turn on an existing session
    pub async fn submit_turn(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<EventStream> {
        if self.is_shut_down() {
            return Err(AgentError::ConnectionLost("runtime is shutting down".to_string()));
        }
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        if session.user_id() != user_id {
            tracing::debug!(session = %session_id, user = %user_id, "Turn submitted by non-owner");
        }
        self.runner.run_turn(session, text)
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).await
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list().await
    }

    /// Forget a session. Returns `false` if it did not exist.
    pub async fn end_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).await.is_some()
    }

    /// Names of the tools the server offers
    pub async fn list_capabilities(&self) -> Result<Vec<String>> {
        Ok(self
            .tool_definitions()
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    pub async fn tool_definitions(&self) -> Result<Vec<ToolDefinition>> {
        self.tools.capabilities().await
    }

    /// Replace a lost tool server connection
    pub async fn reconnect_tools(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(AgentError::ConnectionLost("runtime is shutting down".to_string()));
        }
        self.tools.reconnect().await
    }

    /// Release the tool server. Only the first call does anything.
    pub async fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!(sessions = self.sessions.len().await, "Shutting down runtime");
        self.tools.close().await;
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
