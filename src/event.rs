//! Turn events and the channel that carries them.
//!
//! A turn produces an ordered sequence of [`TurnEvent`]s through an
//! [`EventSink`] and the caller consumes them from an [`EventStream`].
//! The channel is unbounded, so the turn never waits on a slow consumer.
//!
//! Every stream ends with exactly one [`TurnEvent::TurnEnded`]:
//! [`EventSink::finish`] consumes the sink, and if the producer goes away
//! without finishing (panic or abort) the stream synthesizes the terminal
//! event itself.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Failure category carried by error-bearing events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Tool,
    Timeout,
    ConnectionLost,
    Oracle,
    RoundLimit,
    Launch,
    InvalidInput,
    Internal,
}

/// Error payload of a tool result or a failed turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TurnFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A single event in a turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Text produced by the agent
    TextFragment { text: String },

    /// A tool invocation is about to be sent
    ToolCallStarted { id: String, name: String, args: Value },

    /// A tool invocation finished; exactly one of `result` / `error` is set
    ToolCallResult {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TurnFailure>,
    },

    /// The turn is over; always the last event
    TurnEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TurnFailure>,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::TurnEnded { .. })
    }

    /// Error attached to a `ToolCallResult` or `TurnEnded`, if any
    pub fn error(&self) -> Option<&TurnFailure> {
        match self {
            TurnEvent::ToolCallResult { error, .. } | TurnEvent::TurnEnded { error } => {
                error.as_ref()
            }
            _ => None,
        }
    }

    /// Short name used in logs and SSE event fields
    pub fn kind(&self) -> &'static str {
        match self {
            TurnEvent::TextFragment { .. } => "text_fragment",
            TurnEvent::ToolCallStarted { .. } => "tool_call_started",
            TurnEvent::ToolCallResult { .. } => "tool_call_result",
            TurnEvent::TurnEnded { .. } => "turn_ended",
        }
    }
}

/// Create a connected sink/stream pair for one turn
pub fn turn_channel(session_id: impl Into<String>) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx,
            session_id: session_id.into(),
        },
        EventStream {
            rx,
            ended: false,
            task: None,
        },
    )
}

/// Producer half of a turn's event channel
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TurnEvent>,
    session_id: String,
}

impl EventSink {
    pub fn text(&self, text: impl Into<String>) {
        self.emit(TurnEvent::TextFragment { text: text.into() });
    }

    pub fn tool_started(&self, id: &str, name: &str, args: &Value) {
        self.emit(TurnEvent::ToolCallStarted {
            id: id.to_string(),
            name: name.to_string(),
            args: args.clone(),
        });
    }

    pub fn tool_succeeded(&self, id: &str, name: &str, result: impl Into<String>) {
        self.emit(TurnEvent::ToolCallResult {
            id: id.to_string(),
            name: name.to_string(),
            result: Some(result.into()),
            error: None,
        });
    }

    pub fn tool_failed(&self, id: &str, name: &str, error: TurnFailure) {
        self.emit(TurnEvent::ToolCallResult {
            id: id.to_string(),
            name: name.to_string(),
            result: None,
            error: Some(error),
        });
    }

    /// Emit the terminal event. Consumes the sink so nothing can follow it.
    pub fn finish(self, error: Option<TurnFailure>) {
        match &error {
            Some(failure) => tracing::warn!(
                session = %self.session_id,
                kind = ?failure.kind,
                error = %failure.message,
                "Turn ended with error"
            ),
            None => tracing::debug!(session = %self.session_id, "Turn ended"),
        }
        self.emit(TurnEvent::TurnEnded { error });
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: TurnEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(session = %self.session_id, "Event consumer dropped");
        }
    }
}

/// Consumer half of a turn's event channel.
///
/// Dropping the stream before `TurnEnded` cancels the turn task.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<TurnEvent>,
    ended: bool,
    task: Option<AbortHandle>,
}

impl EventStream {
    /// Tie the producing task to this stream so dropping it cancels the turn
    pub fn attach(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    /// Drain every event of the turn, ending with `TurnEnded`
    pub async fn collect_all(mut self) -> Vec<TurnEvent> {
        use futures::StreamExt;

        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.ended = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.ended = true;
                Poll::Ready(Some(TurnEvent::TurnEnded {
                    error: Some(TurnFailure::new(
                        FailureKind::Internal,
                        "turn stopped without a terminal event",
                    )),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if !self.ended {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}
