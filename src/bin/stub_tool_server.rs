//! Minimal MCP tool server over stdio, used by the integration tests and
//! for running the agent without network access.
//!
//! Tools: `echo`, `sleep`, `fail`, `env`, `crash`. Requests are served
//! concurrently, so replies may come back out of order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

use maps_agent::tool::protocol::{
    JsonRpcResponse, METHOD_INITIALIZE, METHOD_NOT_FOUND, METHOD_PING, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, PROTOCOL_VERSION,
};

const INVALID_PARAMS: i32 = -32602;

type Output = Arc<Mutex<Stdout>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let stdout: Output = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let frame: Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("stub-tool-server: bad frame: {}", e);
                continue;
            }
        };
        let Some(id) = frame.get("id").filter(|id| !id.is_null()).cloned() else {
            // notifications need no reply
            continue;
        };
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = frame.get("params").cloned().unwrap_or(Value::Null);

        let stdout = stdout.clone();
        tokio::spawn(async move {
            let response = handle(id, &method, params).await;
            if let Err(e) = send(&stdout, &response).await {
                eprintln!("stub-tool-server: write failed: {}", e);
            }
        });
    }
    Ok(())
}

async fn handle(id: Value, method: &str, params: Value) -> JsonRpcResponse {
    match method {
        METHOD_INITIALIZE => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "stub-tool-server", "version": env!("CARGO_PKG_VERSION") }
            }),
        ),
        METHOD_PING => JsonRpcResponse::success(id, json!({})),
        METHOD_TOOLS_LIST => JsonRpcResponse::success(id, list_page(&params)),
        METHOD_TOOLS_CALL => call_tool(id, params).await,
        other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("unknown method {}", other)),
    }
}

/// Tools are listed over two pages so clients have to follow the cursor
fn list_page(params: &Value) -> Value {
    let schema = |props: Value| json!({ "type": "object", "properties": props });
    match params.get("cursor").and_then(Value::as_str) {
        None => json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Return the given text",
                    "inputSchema": schema(json!({ "text": { "type": "string" } }))
                },
                {
                    "name": "sleep",
                    "description": "Wait for the given number of milliseconds",
                    "inputSchema": schema(json!({ "ms": { "type": "integer" } }))
                }
            ],
            "nextCursor": "page-2"
        }),
        Some(_) => json!({
            "tools": [
                {
                    "name": "fail",
                    "description": "Always report a tool error",
                    "inputSchema": schema(json!({ "message": { "type": "string" } }))
                },
                {
                    "name": "env",
                    "description": "Read an environment variable",
                    "inputSchema": schema(json!({ "name": { "type": "string" } }))
                },
                {
                    "name": "crash",
                    "description": "Exit the server immediately"
                }
            ]
        }),
    }
}

async fn call_tool(id: Value, params: Value) -> JsonRpcResponse {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let str_arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

    match name {
        "echo" => text_result(id, &str_arg("text"), false),
        "sleep" => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            text_result(id, &format!("slept {}ms", ms), false)
        }
        "fail" => {
            let message = match str_arg("message") {
                m if m.is_empty() => "requested failure".to_string(),
                m => m,
            };
            text_result(id, &message, true)
        }
        "env" => text_result(id, &std::env::var(str_arg("name")).unwrap_or_default(), false),
        "crash" => std::process::exit(3),
        other => JsonRpcResponse::failure(id, INVALID_PARAMS, format!("unknown tool {}", other)),
    }
}

fn text_result(id: Value, text: &str, is_error: bool) -> JsonRpcResponse {
    JsonRpcResponse::success(
        id,
        json!({ "content": [{ "type": "text", "text": text }], "isError": is_error }),
    )
}

async fn send(stdout: &Output, response: &JsonRpcResponse) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    let mut out = stdout.lock().await;
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}
