//! Process-wide owner of the single tool server connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::connection::ToolConnection;
use super::ToolBackend;
use crate::config::ToolServerConfig;
use crate::error::{AgentError, Result};
use crate::llm::ToolDefinition;

enum State {
    /// Never connected; the first use launches the server
    Idle,
    /// Last launched connection, possibly dead
    Connected(Arc<ToolConnection>),
    ShutDown,
}

/// Shares one [`ToolConnection`] between all sessions.
///
/// A lost connection is not restarted automatically: calls keep failing
/// with `ConnectionLost` until [`ToolManager::reconnect`] is called.
pub struct ToolManager {
    config: ToolServerConfig,
    state: RwLock<State>,
    /// Serializes launches
    launch: Mutex<()>,
}

impl ToolManager {
    pub fn new(config: ToolServerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::Idle),
            launch: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ToolServerConfig {
        &self.config
    }

    /// Return the live connection, launching one if there is none
    pub async fn connect(&self) -> Result<Arc<ToolConnection>> {
        let _launch = self.launch.lock().await;

        {
            let state = self.state.read().await;
            match &*state {
                State::ShutDown => return Err(shut_down()),
                State::Connected(conn) if conn.is_connected() => return Ok(conn.clone()),
                _ => {}
            }
        }

        self.launch_locked().await
    }

    /// Close the current connection (if any) and launch a fresh one
    pub async fn reconnect(&self) -> Result<Arc<ToolConnection>> {
        let _launch = self.launch.lock().await;
        tracing::info!(command = %self.config.command, "Reconnecting tool server");
        self.launch_locked().await
    }

    async fn launch_locked(&self) -> Result<Arc<ToolConnection>> {
        if matches!(&*self.state.read().await, State::ShutDown) {
            return Err(shut_down());
        }

        let conn = Arc::new(ToolConnection::connect(&self.config).await?);

        let previous = {
            let mut state = self.state.write().await;
            if matches!(&*state, State::ShutDown) {
                drop(state);
                conn.close().await;
                return Err(shut_down());
            }
            std::mem::replace(&mut *state, State::Connected(conn.clone()))
        };
        if let State::Connected(old) = previous {
            old.close().await;
        }

        Ok(conn)
    }

    /// Connection for a tool call: launches lazily only if never connected
    async fn connection_for_use(&self) -> Result<Arc<ToolConnection>> {
        {
            let state = self.state.read().await;
            match &*state {
                State::Connected(conn) => return Ok(conn.clone()),
                State::ShutDown => return Err(shut_down()),
                State::Idle => {}
            }
        }
        tracing::debug!("Launching tool server on first use");
        self.connect().await
    }

    /// The current connection, live or not
    pub async fn current(&self) -> Option<Arc<ToolConnection>> {
        match &*self.state.read().await {
            State::Connected(conn) => Some(conn.clone()),
            _ => None,
        }
    }

    pub async fn is_connected(&self) -> bool {
        match &*self.state.read().await {
            State::Connected(conn) => conn.is_connected(),
            _ => false,
        }
    }

    /// Shut the manager down. Only the first call closes the connection.
    pub async fn close(&self) -> bool {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, State::ShutDown)
        };
        match previous {
            State::ShutDown => false,
            State::Connected(conn) => {
                conn.close().await;
                true
            }
            State::Idle => true,
        }
    }
}

fn shut_down() -> AgentError {
    AgentError::ConnectionLost("tool manager is shut down".to_string())
}

#[async_trait]
impl ToolBackend for ToolManager {
    async fn capabilities(&self) -> Result<Vec<ToolDefinition>> {
        let conn = self.connection_for_use().await?;
        Ok(conn.capabilities().to_vec())
    }

    async fn invoke(&self, name: &str, args: Value, timeout: Duration) -> Result<String> {
        let conn = self.connection_for_use().await?;
        conn.invoke(name, args, timeout).await
    }

    async fn reconnect(&self) -> Result<()> {
        ToolManager::reconnect(self).await.map(|_| ())
    }

    async fn close(&self) -> bool {
        ToolManager::close(self).await
    }
}
