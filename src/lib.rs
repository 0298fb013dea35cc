//! # maps-agent
//!
//! Session runtime for a model-driven agent that reaches its tools through
//! an MCP server running as a child process.
//!
//! ## Overview
//!
//! A caller opens a session, submits a message, and receives the turn as a
//! stream of events: text from the agent, tool calls as they start and
//! finish, and a terminal event. One tool server process is shared by all
//! sessions; a crash there ends the turns that were using it and leaves
//! every session usable once the server is reconnected.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use maps_agent::{AgentConfig, AgentRuntime};
//!
//! # async fn example() -> maps_agent::Result<()> {
//! let runtime = AgentRuntime::builder(AgentConfig::load(None)?).build()?;
//! runtime.start().await?;
//!
//! let (session_id, _) = runtime.create_or_get_session("google_map_adk", "alice", None).await?;
//! let events = runtime
//!     .submit_turn(&session_id, "alice", "Coffee near the Louvre?")
//!     .await?
//!     .collect_all()
//!     .await;
//! println!("{} events", events.len());
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **tool**: stdio transport, MCP handshake, the shared [`ToolManager`]
//! - **session**: [`SessionStore`] and the per-session turn lock
//! - **llm**: message model, [`ModelOracle`] trait, Gemini client
//! - **event**: [`TurnEvent`] and the per-turn event channel
//! - **runner**: the bounded reasoning loop with tool fan-out
//! - **runtime**: [`AgentRuntime`], the entry point for every transport
//! - **server** / **api**: axum HTTP surface
//! - **console**: interactive loop and one-shot prompt

pub mod api;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod event;
pub mod llm;
pub mod retry;
pub mod runner;
pub mod runtime;
pub mod server;
pub mod session;
pub mod tool;

#[cfg(test)]
pub(crate) mod testing;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use event::{EventStream, FailureKind, TurnEvent, TurnFailure};
pub use llm::{GeminiClient, Message, ModelOracle, OracleReply, OracleRequest, ToolDefinition};
pub use runner::{RunnerSettings, TurnRunner};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder};
pub use session::{Session, SessionInfo, SessionStore};
pub use tool::{ToolBackend, ToolConnection, ToolManager};
