//! Tool server bridge
//!
//! - [`protocol`]: JSON-RPC / MCP frames
//! - [`transport`]: child process, single writer, id-correlated reader
//! - [`connection`]: handshake, capability list, `invoke`
//! - [`manager`]: the one shared connection for the whole process

pub mod connection;
pub mod manager;
pub mod protocol;
pub mod transport;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::ToolDefinition;

pub use connection::ToolConnection;
pub use manager::ToolManager;

/// Tool access as seen by the turn runner
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Tool definitions offered to the model. May launch the server.
    async fn capabilities(&self) -> Result<Vec<ToolDefinition>>;

    /// Run one tool call, bounded by `timeout`
    async fn invoke(&self, name: &str, args: Value, timeout: Duration) -> Result<String>;

    /// Replace a lost connection with a fresh one
    async fn reconnect(&self) -> Result<()>;

    /// Release the backend; `true` only for the call that did it
    async fn close(&self) -> bool;
}
