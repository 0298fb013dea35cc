//! Stdio transport for the tool server
//!
//! Spawns the server as a child process and multiplexes concurrent
//! JSON-RPC requests over its stdin/stdout. A single writer task owns
//! stdin, so frames never interleave. A reader task routes responses to
//! their callers by id. When stdout closes, every outstanding request
//! fails with [`AgentError::ConnectionLost`].

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::protocol::{
    IncomingFrame, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND, METHOD_PING,
};
use crate::error::{AgentError, Result};

/// Outstanding requests (id -> response slot)
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<JsonRpcResponse>>>>>;

/// Server-side outcome of a request that reached the tool server
pub type RpcResult = std::result::Result<Value, JsonRpcError>;

const WRITER_QUEUE: usize = 100;

pub struct StdioTransport {
    command: String,
    child: tokio::sync::Mutex<Option<Child>>,
    writer: mpsc::Sender<String>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl StdioTransport {
    /// Spawn the tool server. The child inherits this process's
    /// environment plus `env`.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| AgentError::Launch {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        let launch_error = |what: &str| AgentError::Launch {
            command: command.to_string(),
            reason: format!("child has no {}", what),
        };
        let stdin = child.stdin.take().ok_or_else(|| launch_error("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| launch_error("stdout"))?;
        let stderr = child.stderr.take();

        let (writer, mut queue) = mpsc::channel::<String>(WRITER_QUEUE);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        {
            let pending = pending.clone();
            let connected = connected.clone();
            let mut stdin = stdin;
            tokio::spawn(async move {
                while let Some(line) = queue.recv().await {
                    let written = match stdin.write_all(line.as_bytes()).await {
                        Ok(()) => stdin.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = written {
                        tracing::warn!(error = %e, "Failed to write to tool server");
                        fail_pending(&pending, &connected, &format!("write failed: {}", e));
                        break;
                    }
                }
            });
        }

        tokio::spawn(read_loop(
            stdout,
            pending.clone(),
            connected.clone(),
            writer.clone(),
        ));

        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr, command.to_string()));
        }

        tracing::info!(command = %command, args = ?args, pid = ?child.id(), "Tool server spawned");

        Ok(Self {
            command: command.to_string(),
            child: tokio::sync::Mutex::new(Some(child)),
            writer,
            pending,
            connected,
            next_id: AtomicU64::new(1),
        })
    }

    /// Send a request and wait for its response, the timeout, or loss of
    /// the connection, whichever comes first. The timeout also bounds the
    /// time spent queueing the request.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<RpcResult> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        lock(&self.pending).insert(id, tx);
        let mut guard = PendingGuard {
            id,
            pending: &self.pending,
            writer: &self.writer,
            connected: &self.connected,
            armed: true,
        };

        // The reader flips the flag before draining, so a request that
        // registered after the drain is caught here.
        if !self.is_connected() {
            return Err(AgentError::ConnectionLost(format!(
                "tool server '{}' is not connected",
                self.command
            )));
        }

        let line = to_line(&JsonRpcRequest::new(id, method, params))?;

        // One deadline covers both the enqueue and the wait: a server that
        // stops reading stdin backs up the writer queue.
        let exchange = async {
            if self.writer.send(line).await.is_err() {
                return Err(AgentError::ConnectionLost(
                    "tool server writer has stopped".to_string(),
                ));
            }
            Ok(rx.await)
        };

        let response = match tokio::time::timeout(timeout, exchange).await {
            Err(_) => {
                tracing::warn!(id, method, timeout_ms = timeout.as_millis() as u64, "Tool server request timed out");
                return Err(AgentError::Timeout {
                    tool: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(Err(_))) => {
                guard.armed = false;
                return Err(AgentError::ConnectionLost(
                    "response slot dropped".to_string(),
                ));
            }
            Ok(Ok(Ok(response))) => {
                guard.armed = false;
                response?
            }
        };

        Ok(match response.error {
            Some(error) => Err(error),
            None => Ok(response.result.unwrap_or(Value::Null)),
        })
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_connected() {
            return Err(AgentError::ConnectionLost(format!(
                "tool server '{}' is not connected",
                self.command
            )));
        }
        let line = to_line(&JsonRpcNotification::new(method, params))?;
        self.writer
            .send(line)
            .await
            .map_err(|_| AgentError::ConnectionLost("tool server writer has stopped".to_string()))
    }

    /// Kill the child and fail all outstanding requests. Returns `true` if
    /// this call released the process, `false` if it was already closed.
    pub async fn close(&self) -> bool {
        let child = self.child.lock().await.take();
        fail_pending(&self.pending, &self.connected, "connection closed");

        match child {
            Some(mut child) => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "Tool server already exited");
                }
                tracing::info!(command = %self.command, "Tool server closed");
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of requests waiting for a response
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Removes an abandoned request from the map and tells the server about it.
struct PendingGuard<'a> {
    id: u64,
    pending: &'a PendingMap,
    writer: &'a mpsc::Sender<String>,
    connected: &'a AtomicBool,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = lock(self.pending).remove(&self.id).is_some();
        if removed && self.connected.load(Ordering::SeqCst) {
            let notice = JsonRpcNotification::cancelled(self.id, "request abandoned by client");
            if let Ok(line) = to_line(&notice) {
                let _ = self.writer.try_send(line);
            }
            tracing::debug!(id = self.id, "Abandoned tool server request");
        }
    }
}

async fn read_loop(
    stdout: ChildStdout,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    writer: mpsc::Sender<String>,
) {
    let mut lines = BufReader::new(stdout).lines();

    let reason = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break "tool server exited".to_string(),
            Err(e) => break format!("read failed: {}", e),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match IncomingFrame::parse(trimmed) {
            Ok(IncomingFrame::Response(response)) => {
                let Some(id) = response.request_id() else {
                    tracing::warn!(frame = %trimmed, "Response without a usable id");
                    continue;
                };
                let slot = lock(&pending).remove(&id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => tracing::debug!(id, "Late response for abandoned request"),
                }
            }
            Ok(IncomingFrame::Request { id, method }) => {
                let reply = if method == METHOD_PING {
                    JsonRpcResponse::success(id, serde_json::json!({}))
                } else {
                    JsonRpcResponse::failure(
                        id,
                        METHOD_NOT_FOUND,
                        format!("method '{}' is not supported by this client", method),
                    )
                };
                match to_line(&reply) {
                    Ok(line) => {
                        if writer.send(line).await.is_err() {
                            break "tool server writer has stopped".to_string();
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to encode reply"),
                }
            }
            Ok(IncomingFrame::Notification { method, params }) => {
                tracing::debug!(method = %method, params = ?params, "Tool server notification");
            }
            Err(e) => {
                tracing::warn!(error = %e, frame = %trimmed, "Unparseable tool server frame");
            }
        }
    };

    tracing::info!(reason = %reason, "Tool server connection ended");
    fail_pending(&pending, &connected, &reason);
}

async fn forward_stderr(stderr: ChildStderr, command: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(command = %command, "tool server: {}", line);
    }
}

/// Mark the connection lost and resolve every outstanding request with
/// `ConnectionLost`.
fn fail_pending(pending: &PendingMap, connected: &AtomicBool, reason: &str) {
    connected.store(false, Ordering::SeqCst);
    let drained: Vec<_> = lock(pending).drain().collect();
    if !drained.is_empty() {
        tracing::warn!(count = drained.len(), reason = %reason, "Failing pending tool requests");
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(AgentError::ConnectionLost(reason.to_string())));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_line<T: Serialize>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)? + "\n")
}
