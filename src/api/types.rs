use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::event::TurnEvent;
use crate::session::SessionInfo;

/// Body of `POST /run` and `POST /run_sse`
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub app_name: String,
    pub user_id: String,
    /// A new session id is generated when absent
    #[serde(default)]
    pub session_id: Option<String>,
    pub new_message: NewMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl RunRequest {
    /// Text of the first message part. Blank text is rejected here so no
    /// session is created for a request that cannot run.
    pub fn text(&self) -> Result<&str> {
        let first = self
            .new_message
            .parts
            .first()
            .ok_or_else(|| AgentError::InvalidInput("new_message.parts is empty".to_string()))?;
        match first.text.as_deref() {
            None => Err(AgentError::InvalidInput(
                "new_message.parts[0] has no text".to_string(),
            )),
            Some(text) if text.trim().is_empty() => {
                Err(AgentError::InvalidInput("message text is empty".to_string()))
            }
            Some(text) => Ok(text),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub session_id: String,
    pub user_id: String,
    pub response_events: Vec<TurnEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub message: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppsResponse {
    pub status: String,
    pub app_name: String,
    pub available_tools: Vec<String>,
    pub message: String,
}
