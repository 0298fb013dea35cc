//! Shared helpers for integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use maps_agent::config::ToolServerConfig;
use maps_agent::{AgentConfig, AgentError, ModelOracle, OracleReply, OracleRequest, Result};

/// Tool server config pointing at the stub binary built with this crate
pub fn stub_server() -> ToolServerConfig {
    ToolServerConfig {
        command: env!("CARGO_BIN_EXE_stub-tool-server").to_string(),
        args: vec![],
        startup_timeout_secs: 10,
        call_timeout_secs: 5,
        connect_on_startup: true,
        ..Default::default()
    }
}

pub fn stub_agent_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.tool_server = stub_server();
    config
}

/// Model stand-in that replays a fixed script
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<OracleReply>>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<Result<OracleReply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
        })
    }
}

#[async_trait]
impl ModelOracle for ScriptedOracle {
    async fn complete(&self, _request: OracleRequest<'_>) -> Result<OracleReply> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Oracle("script exhausted".to_string())))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
