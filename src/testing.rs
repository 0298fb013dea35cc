//! Test doubles for the model and the tool server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::llm::{ModelOracle, OracleReply, OracleRequest, ToolDefinition};
use crate::tool::ToolBackend;

/// Oracle that replays scripted replies in order
pub(crate) struct ScriptedOracle {
    replies: std::sync::Mutex<VecDeque<Result<OracleReply>>>,
    calls: AtomicUsize,
    pub(crate) seen_system: std::sync::Mutex<Option<String>>,
    pub(crate) seen_tools: AtomicUsize,
}

impl ScriptedOracle {
    pub(crate) fn new(replies: Vec<Result<OracleReply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: std::sync::Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            seen_system: std::sync::Mutex::new(None),
            seen_tools: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelOracle for ScriptedOracle {
    async fn complete(&self, request: OracleRequest<'_>) -> Result<OracleReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen_system.lock().unwrap() = request.system.map(str::to_string);
        self.seen_tools.store(request.tools.len(), Ordering::SeqCst);
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

/// Oracle that answers only once released
pub(crate) struct GatedOracle {
    pub(crate) gate: tokio::sync::Notify,
}

impl GatedOracle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: tokio::sync::Notify::new(),
        })
    }
}

#[async_trait]
impl ModelOracle for GatedOracle {
    async fn complete(&self, _request: OracleRequest<'_>) -> Result<OracleReply> {
        self.gate.notified().await;
        Ok(OracleReply::text("released"))
    }

    fn model(&self) -> &str {
        "gated"
    }
}

#[derive(Clone)]
pub(crate) enum Behavior {
    Reply(&'static str),
    Delayed(u64, &'static str),
    Fail(&'static str),
    Timeout,
    Lost,
}

pub(crate) struct FakeTools {
    behaviors: HashMap<&'static str, Behavior>,
    pub(crate) invocations: AtomicUsize,
    pub(crate) completed: std::sync::Mutex<Vec<String>>,
    pub(crate) reconnects: AtomicUsize,
    pub(crate) closes: AtomicUsize,
    unavailable: bool,
}

impl FakeTools {
    pub(crate) fn new(behaviors: Vec<(&'static str, Behavior)>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors.into_iter().collect(),
            invocations: AtomicUsize::new(0),
            completed: std::sync::Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            unavailable: false,
        })
    }

    pub(crate) fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            behaviors: HashMap::new(),
            invocations: AtomicUsize::new(0),
            completed: std::sync::Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            unavailable: true,
        })
    }
}

#[async_trait]
impl ToolBackend for FakeTools {
    async fn capabilities(&self) -> Result<Vec<ToolDefinition>> {
        if self.unavailable {
            return Err(AgentError::Launch {
                command: "npx".to_string(),
                reason: "not found".to_string(),
            });
        }
        let mut names: Vec<_> = self.behaviors.keys().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| ToolDefinition {
                name: name.to_string(),
                description: format!("{} tool", name),
                parameters: json!({"type": "object", "properties": {}}),
            })
            .collect())
    }

    async fn invoke(&self, name: &str, _args: Value, timeout: Duration) -> Result<String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.behaviors.get(name).cloned() {
            Some(Behavior::Reply(text)) => Ok(text.to_string()),
            Some(Behavior::Delayed(ms, text)) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.completed.lock().unwrap().push(name.to_string());
                Ok(text.to_string())
            }
            Some(Behavior::Fail(message)) => Err(AgentError::Tool {
                tool: name.to_string(),
                message: message.to_string(),
            }),
            Some(Behavior::Timeout) => Err(AgentError::Timeout {
                tool: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Some(Behavior::Lost) => Err(AgentError::ConnectionLost("tool server exited".to_string())),
            None => Err(AgentError::Tool {
                tool: name.to_string(),
                message: "unknown tool".to_string(),
            }),
        }
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> bool {
        self.closes.fetch_add(1, Ordering::SeqCst) == 0
    }
}
