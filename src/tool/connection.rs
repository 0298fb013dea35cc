//! A live, handshaken connection to the tool server.

use std::time::Duration;

use serde_json::Value;

use super::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    ListToolsResult, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use super::transport::StdioTransport;
use crate::config::ToolServerConfig;
use crate::error::{AgentError, Result};
use crate::llm::ToolDefinition;

const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on `tools/list` pages
const MAX_TOOL_PAGES: usize = 32;

pub struct ToolConnection {
    transport: StdioTransport,
    server_info: Option<Implementation>,
    tools: Vec<ToolDefinition>,
}

impl ToolConnection {
    /// Spawn the tool server and complete the capability handshake.
    ///
    /// Any failure before the handshake finishes is a launch error and
    /// leaves no process behind.
    pub async fn connect(config: &ToolServerConfig) -> Result<Self> {
        let transport = StdioTransport::spawn(&config.command, &config.args, &config.env).await?;

        match handshake(&transport, config.startup_timeout()).await {
            Ok((server_info, tools)) => {
                tracing::info!(
                    command = %config.command,
                    server = ?server_info.as_ref().map(|s| &s.name),
                    tools = tools.len(),
                    "Tool server ready"
                );
                Ok(Self {
                    transport,
                    server_info,
                    tools,
                })
            }
            Err(e) => {
                transport.close().await;
                Err(AgentError::Launch {
                    command: config.command.clone(),
                    reason: format!("handshake failed: {}", e),
                })
            }
        }
    }

    /// Call a tool and return its rendered text result.
    pub async fn invoke(&self, name: &str, args: Value, timeout: Duration) -> Result<String> {
        if !self.has_tool(name) {
            return Err(AgentError::Tool {
                tool: name.to_string(),
                message: "unknown tool".to_string(),
            });
        }

        let arguments = if args.is_null() {
            serde_json::json!({})
        } else {
            args
        };
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;

        tracing::debug!(tool = name, "Invoking tool");
        let outcome = self
            .transport
            .request(METHOD_TOOLS_CALL, Some(params), timeout)
            .await
            .map_err(|e| match e {
                AgentError::Timeout { timeout_ms, .. } => AgentError::Timeout {
                    tool: name.to_string(),
                    timeout_ms,
                },
                other => other,
            })?;

        let value = outcome.map_err(|e| AgentError::Tool {
            tool: name.to_string(),
            message: format!("{} ({})", e.message, e.code),
        })?;
        let result: CallToolResult = serde_json::from_value(value).map_err(|e| AgentError::Tool {
            tool: name.to_string(),
            message: format!("malformed tool result: {}", e),
        })?;

        let text = result.render();
        if result.is_error {
            Err(AgentError::Tool {
                tool: name.to_string(),
                message: text,
            })
        } else {
            Ok(text)
        }
    }

    /// Tool definitions reported during the handshake
    pub fn capabilities(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn pending_count(&self) -> usize {
        self.transport.pending_count()
    }

    /// Idempotent; pending invocations resolve with `ConnectionLost`
    pub async fn close(&self) -> bool {
        self.transport.close().await
    }
}

async fn handshake(
    transport: &StdioTransport,
    timeout: Duration,
) -> Result<(Option<Implementation>, Vec<ToolDefinition>)> {
    let params = serde_json::to_value(InitializeParams::for_client(CLIENT_NAME, CLIENT_VERSION))?;
    let init = transport
        .request(METHOD_INITIALIZE, Some(params), timeout)
        .await?
        .map_err(|e| AgentError::Protocol(format!("initialize rejected: {} ({})", e.message, e.code)))?;
    let init: InitializeResult = serde_json::from_value(init)?;
    tracing::debug!(protocol = %init.protocol_version, "Tool server initialized");

    transport.notify(METHOD_INITIALIZED, None).await?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
        let page = transport
            .request(METHOD_TOOLS_LIST, params, timeout)
            .await?
            .map_err(|e| AgentError::Protocol(format!("tools/list rejected: {} ({})", e.message, e.code)))?;
        let page: ListToolsResult = serde_json::from_value(page)?;
        tools.extend(page.tools.into_iter().map(ToolDefinition::from));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok((init.server_info, tools))
}
