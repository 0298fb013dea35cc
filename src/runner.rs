//! Turn runner
//!
//! Drives one turn of agent reasoning: ask the model, run the tool calls it
//! asks for (concurrently), feed the results back, and repeat until it
//! answers with text or the round limit is reached. Progress is reported
//! through the turn's [`EventStream`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::Instrument;

use crate::error::{AgentError, Result};
use crate::event::{turn_channel, EventSink, EventStream, FailureKind, TurnFailure};
use crate::llm::{Message, ModelOracle, OracleReply, OracleRequest, ToolCall};
use crate::session::Session;
use crate::tool::ToolBackend;

/// Default upper bound on model calls in a single turn
pub const DEFAULT_MAX_ROUNDS: usize = 10;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub max_rounds: usize,
    /// Bound on each tool call
    pub tool_timeout: Duration,
    /// System instruction for the model
    pub instruction: Option<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_timeout: Duration::from_secs(60),
            instruction: None,
        }
    }
}

/// Shared by every session; holds no per-turn state.
#[derive(Clone)]
pub struct TurnRunner {
    oracle: Arc<dyn ModelOracle>,
    tools: Arc<dyn ToolBackend>,
    settings: Arc<RunnerSettings>,
}

impl TurnRunner {
    pub fn new(
        oracle: Arc<dyn ModelOracle>,
        tools: Arc<dyn ToolBackend>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            oracle,
            tools,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Start a turn on `session` and return its event stream.
    ///
    /// Empty input and a session that is already mid-turn are rejected
    /// here, before anything is recorded. The turn itself runs on a
    /// spawned task; dropping the stream early cancels it.
    pub fn run_turn(&self, session: Arc<Session>, message: &str) -> Result<EventStream> {
        if message.trim().is_empty() {
            return Err(AgentError::InvalidInput("message text is empty".to_string()));
        }
        let guard = session.try_begin_turn()?;

        let (sink, mut stream) = turn_channel(session.id());
        let runner = self.clone();
        let message = message.to_string();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            runner.drive(session, message, sink).await;
        });
        stream.attach(handle.abort_handle());
        Ok(stream)
    }

    async fn drive(&self, session: Arc<Session>, message: String, sink: EventSink) {
        let span = tracing::info_span!(
            "turn",
            session = %session.id(),
            user = %session.user_id(),
            model = %self.oracle.model(),
        );
        async {
            session.append(Message::user(message)).await;
            let outcome = self.run_rounds(&session, &sink).await;
            sink.finish(outcome.err());
        }
        .instrument(span)
        .await
    }

    async fn run_rounds(
        &self,
        session: &Session,
        sink: &EventSink,
    ) -> std::result::Result<(), TurnFailure> {
        let tools = self.tools.capabilities().await.map_err(|e| {
            tracing::error!(error = %e, "Tool definitions unavailable");
            TurnFailure::from(e)
        })?;

        for round in 1..=self.settings.max_rounds {
            let history = session.history().await;
            tracing::debug!(round, messages = history.len(), "Asking model");

            let reply = self
                .oracle
                .complete(OracleRequest {
                    system: self.settings.instruction.as_deref(),
                    history: &history,
                    tools: &tools,
                })
                .await
                .map_err(|e| {
                    tracing::warn!(round, error = %e, "Model call failed");
                    TurnFailure::new(FailureKind::Oracle, e.to_string())
                })?;

            match reply {
                OracleReply::Final { parts } if parts.iter().all(|p| p.is_empty()) => {
                    return Err(TurnFailure::new(
                        FailureKind::Oracle,
                        "model returned an empty answer",
                    ));
                }
                OracleReply::Final { parts } => {
                    let mut text = String::new();
                    for part in parts {
                        if !part.is_empty() {
                            sink.text(part.clone());
                        }
                        text.push_str(&part);
                    }
                    session.append(Message::agent(text)).await;
                    tracing::info!(rounds = round, "Turn completed");
                    return Ok(());
                }
                OracleReply::ToolCalls { calls, .. } if calls.is_empty() => {
                    return Err(TurnFailure::new(
                        FailureKind::Oracle,
                        "model asked for an empty set of tool calls",
                    ));
                }
                OracleReply::ToolCalls { calls, preamble } => {
                    for part in preamble.iter().filter(|p| !p.is_empty()) {
                        sink.text(part.clone());
                    }
                    self.run_tools(session, sink, &preamble, &calls).await?;
                }
            }
        }

        Err(TurnFailure::new(
            FailureKind::RoundLimit,
            format!(
                "no final answer after {} model calls",
                self.settings.max_rounds
            ),
        ))
    }

    /// Run one step's tool calls concurrently and record the exchange.
    ///
    /// Tool errors and timeouts go back to the model as error results.
    /// Anything else (lost connection) still records every result, then
    /// ends the turn.
    async fn run_tools(
        &self,
        session: &Session,
        sink: &EventSink,
        preamble: &[String],
        calls: &[ToolCall],
    ) -> std::result::Result<(), TurnFailure> {
        for call in calls {
            sink.tool_started(&call.id, &call.name, &call.args);
        }

        let timeout = self.settings.tool_timeout;
        let futures = calls.iter().map(|call| {
            let span = tracing::info_span!("tool", tool = %call.name, call_id = %call.id);
            self.tools
                .invoke(&call.name, call.args.clone(), timeout)
                .instrument(span)
        });
        let outcomes = join_all(futures).await;

        let mut exchange = Vec::with_capacity(calls.len() + 1);
        exchange.push(Message::tool_step(preamble, calls));
        let mut fatal: Option<TurnFailure> = None;

        for (call, outcome) in calls.iter().zip(outcomes) {
            match outcome {
                Ok(text) => {
                    tracing::debug!(tool = %call.name, bytes = text.len(), "Tool call succeeded");
                    sink.tool_succeeded(&call.id, &call.name, text.clone());
                    exchange.push(Message::tool_result(call, text, false));
                }
                Err(e) => {
                    let failure = TurnFailure::from(&e);
                    if e.is_recoverable() {
                        tracing::warn!(tool = %call.name, error = %e, "Tool call failed");
                    } else if fatal.is_none() {
                        tracing::error!(tool = %call.name, error = %e, "Tool connection failed");
                        fatal = Some(failure.clone());
                    }
                    sink.tool_failed(&call.id, &call.name, failure);
                    exchange.push(Message::tool_result(call, e.to_string(), true));
                }
            }
        }

        session.extend(exchange).await;
        match fatal {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}
