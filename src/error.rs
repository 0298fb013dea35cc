//! Error types for maps-agent

use thiserror::Error;

use crate::event::{FailureKind, TurnFailure};

/// Errors that can occur in the agent runtime
#[derive(Debug, Error)]
pub enum AgentError {
    /// Tool server could not be started or failed its handshake
    #[error("Failed to launch tool server '{command}': {reason}")]
    Launch { command: String, reason: String },

    /// Tool server exited or the connection was closed
    #[error("Tool server connection lost: {0}")]
    ConnectionLost(String),

    /// A tool call did not answer in time
    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// The tool server reported an error for a single call
    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// Model provider failure
    #[error("Model error: {0}")]
    Oracle(String),

    /// A turn is already running for this session
    #[error("Session '{0}' already has a turn in flight")]
    SessionBusy(String),

    /// Caller supplied unusable input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown session id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Malformed or unexpected frame from the tool server
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// HTTP transport failure talking to the model provider
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Whether the turn loop can fold this error into history and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AgentError::Tool { .. } | AgentError::Timeout { .. })
    }

    /// Category reported to event consumers
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AgentError::Launch { .. } => FailureKind::Launch,
            AgentError::ConnectionLost(_) => FailureKind::ConnectionLost,
            AgentError::Timeout { .. } => FailureKind::Timeout,
            AgentError::Tool { .. } => FailureKind::Tool,
            AgentError::Oracle(_) | AgentError::Http(_) => FailureKind::Oracle,
            AgentError::InvalidInput(_) => FailureKind::InvalidInput,
            _ => FailureKind::Internal,
        }
    }
}

impl From<&AgentError> for TurnFailure {
    fn from(err: &AgentError) -> Self {
        TurnFailure::new(err.failure_kind(), err.to_string())
    }
}

impl From<AgentError> for TurnFailure {
    fn from(err: AgentError) -> Self {
        TurnFailure::from(&err)
    }
}

impl From<AgentError> for axum::response::Response {
    fn from(err: AgentError) -> Self {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let status = match &err {
            AgentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AgentError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AgentError::SessionBusy(_) => StatusCode::CONFLICT,
            AgentError::ConnectionLost(_) | AgentError::Launch { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": err.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl axum::response::IntoResponse for AgentError {
    fn into_response(self) -> axum::response::Response {
        self.into()
    }
}
