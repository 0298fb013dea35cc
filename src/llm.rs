//! Conversation model and the model oracle seam.
//!
//! The turn runner only sees [`ModelOracle`]: given the system instruction,
//! the history, and the available tools, it answers with either final text
//! or a batch of tool calls. [`GeminiClient`] implements it over the Gemini
//! `generateContent` REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::error::{AgentError, Result};
use crate::retry::{self, RetryConfig};

/// API key wrapper that never prints its value
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Access the secret value (only for HTTP headers)
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Conversation Types
// ============================================================================

/// Tool definition advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Tool,
}

/// Message content types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// One entry of a session's history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Agent message recording the tool calls of one reasoning step
    pub fn tool_calls(calls: &[ToolCall]) -> Self {
        Self::tool_step(&[], calls)
    }

    /// Like `tool_calls`, keeping the text the model wrote before its calls
    pub fn tool_step(preamble: &[String], calls: &[ToolCall]) -> Self {
        let text = preamble
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| ContentBlock::Text { text: t.clone() });
        let calls = calls.iter().map(|c| ContentBlock::ToolCall {
            id: c.id.clone(),
            name: c.name.clone(),
            args: c.args.clone(),
        });
        Self {
            role: Role::Agent,
            content: text.chain(calls).collect(),
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentBlock::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content: content.into(),
                is_error,
            }],
        }
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Everything the model sees for one reasoning step
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub system: Option<&'a str>,
    pub history: &'a [Message],
    pub tools: &'a [ToolDefinition],
}

/// The model's decision for one reasoning step
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// Final answer, as the text parts the model produced
    Final { parts: Vec<String> },
    /// One or more tool invocations to run before asking again, with any
    /// text the model produced alongside them
    ToolCalls {
        calls: Vec<ToolCall>,
        preamble: Vec<String>,
    },
}

impl OracleReply {
    pub fn text(text: impl Into<String>) -> Self {
        OracleReply::Final {
            parts: vec![text.into()],
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        OracleReply::ToolCalls {
            calls,
            preamble: Vec::new(),
        }
    }
}

/// Language model seam used by the turn runner
#[async_trait]
pub trait ModelOracle: Send + Sync {
    async fn complete(&self, request: OracleRequest<'_>) -> Result<OracleReply>;

    /// Model identifier for logs
    fn model(&self) -> &str;
}

// ============================================================================
// Gemini Client
// ============================================================================

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini `generateContent` client
pub struct GeminiClient {
    api_key: SecretString,
    model: String,
    base_url: String,
    client: reqwest::Client,
    retry_config: RetryConfig,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<SecretString>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.base_url = base_url.as_ref().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

/// Build the `generateContent` request body
pub fn build_gemini_request(request: &OracleRequest<'_>) -> Value {
    let mut contents: Vec<Value> = Vec::new();

    for message in request.history {
        let (role, parts) = match message.role {
            Role::User => ("user", gemini_parts(&message.content)),
            Role::Agent => ("model", gemini_parts(&message.content)),
            Role::Tool => ("user", gemini_parts(&message.content)),
        };
        if parts.is_empty() {
            continue;
        }

        // Parallel tool results go back as a single turn
        let merge = message.role == Role::Tool
            && contents
                .last()
                .and_then(|c| c.get("parts"))
                .and_then(Value::as_array)
                .is_some_and(|p| p.iter().all(|part| part.get("functionResponse").is_some()));
        if merge {
            if let Some(Value::Array(existing)) =
                contents.last_mut().and_then(|c| c.get_mut("parts"))
            {
                existing.extend(parts);
                continue;
            }
        }

        contents.push(serde_json::json!({ "role": role, "parts": parts }));
    }

    let mut body = serde_json::json!({ "contents": contents });

    if let Some(system) = request.system {
        body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
    }

    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                let mut decl = serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                });
                let schema = sanitize_schema(&tool.parameters);
                let has_properties = schema
                    .get("properties")
                    .and_then(Value::as_object)
                    .is_some_and(|p| !p.is_empty());
                if has_properties {
                    decl["parameters"] = schema;
                }
                decl
            })
            .collect();
        body["tools"] = serde_json::json!([{ "functionDeclarations": declarations }]);
    }

    body
}

fn gemini_parts(content: &[ContentBlock]) -> Vec<Value> {
    content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => serde_json::json!({ "text": text }),
            ContentBlock::ToolCall { id, name, args } => serde_json::json!({
                "functionCall": { "id": id, "name": name, "args": args }
            }),
            ContentBlock::ToolResult {
                call_id,
                name,
                content,
                is_error,
            } => {
                let key = if *is_error { "error" } else { "result" };
                serde_json::json!({
                    "functionResponse": { "id": call_id, "name": name, "response": { key: content } }
                })
            }
        })
        .collect()
}

/// Strip JSON Schema keywords the function declaration format rejects
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "$schema" && key.as_str() != "additionalProperties")
                .map(|(key, value)| (key.clone(), sanitize_schema(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<Value>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

/// Turn a `generateContent` response body into an oracle reply
pub fn parse_gemini_response(body: &str) -> Result<OracleReply> {
    let response: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| AgentError::Oracle(format!("failed to parse model response: {}", e)))?;

    if let Some(usage) = &response.usage_metadata {
        tracing::debug!(
            prompt_tokens = usage.prompt_token_count,
            completion_tokens = usage.candidates_token_count,
            total_tokens = usage.total_token_count,
            "Model usage"
        );
    }

    let candidate = match response.candidates.into_iter().next() {
        Some(candidate) => candidate,
        None => {
            let reason = response
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.get("blockReason"))
                .and_then(Value::as_str)
                .unwrap_or("no candidates returned");
            return Err(AgentError::Oracle(format!("model returned nothing: {}", reason)));
        }
    };

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    let mut texts = Vec::new();
    let mut calls = Vec::new();
    for part in parts {
        if let Some(call) = part.function_call {
            calls.push(ToolCall {
                id: call
                    .id
                    .unwrap_or_else(|| format!("call-{}", uuid::Uuid::new_v4())),
                name: call.name,
                args: if call.args.is_null() {
                    serde_json::json!({})
                } else {
                    call.args
                },
            });
        } else if let Some(text) = part.text {
            texts.push(text);
        }
    }

    if !calls.is_empty() {
        return Ok(OracleReply::ToolCalls {
            calls,
            preamble: texts,
        });
    }
    if texts.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(AgentError::Oracle(format!(
            "model returned no text (finish reason: {})",
            reason
        )));
    }
    Ok(OracleReply::Final { parts: texts })
}

/// A failed attempt that may succeed if repeated
#[derive(Debug)]
enum Transient {
    Status {
        status: reqwest::StatusCode,
        body: String,
        retry_after: Option<std::time::Duration>,
    },
    Network(reqwest::Error),
}

impl Transient {
    fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Transient::Status { retry_after, .. } => *retry_after,
            Transient::Network(_) => None,
        }
    }
}

impl std::fmt::Display for Transient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transient::Status { status, body, .. } => write!(f, "status {}: {}", status, body),
            Transient::Network(e) => write!(f, "network error: {}", e),
        }
    }
}

impl GeminiClient {
    /// POST once. `Ok(Err(_))` is a failure worth retrying.
    async fn post_once(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<std::result::Result<String, Transient>> {
        let response = match self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose())
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if self.retry_config.is_retryable_send_error(&e) => {
                return Ok(Err(Transient::Network(e)))
            }
            Err(e) => return Err(AgentError::Http(e)),
        };

        let status = response.status();
        let retry_after = retry::retry_after(response.headers());
        let text = response.text().await?;

        if status.is_success() {
            Ok(Ok(text))
        } else if self.retry_config.is_retryable_status(status) {
            Ok(Err(Transient::Status {
                status,
                body: text,
                retry_after,
            }))
        } else {
            Err(AgentError::Oracle(format!(
                "Gemini API error ({}): {}",
                status, text
            )))
        }
    }

    /// POST with backoff on quota, overload, and network failures
    async fn post_with_retry(&self, body: &Value) -> Result<String> {
        let url = self.endpoint();
        let mut failures = 0u32;
        loop {
            let transient = match self.post_once(&url, body).await? {
                Ok(text) => {
                    if failures > 0 {
                        tracing::info!(failures, "Gemini request succeeded after retry");
                    }
                    return Ok(text);
                }
                Err(transient) => transient,
            };

            failures += 1;
            if failures > self.retry_config.max_retries {
                return Err(AgentError::Oracle(format!(
                    "Gemini request failed after {} attempts, last {}",
                    failures, transient
                )));
            }
            let delay = self.retry_config.backoff(failures, transient.retry_after());
            tracing::warn!(
                attempt = failures,
                max_retries = self.retry_config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %transient,
                "Gemini request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ModelOracle for GeminiClient {
    async fn complete(&self, request: OracleRequest<'_>) -> Result<OracleReply> {
        let span = tracing::info_span!(
            "model.completion",
            provider = "gemini",
            model = %self.model,
            messages = request.history.len(),
            tools = request.tools.len(),
        );
        async {
            let body = build_gemini_request(&request);
            let text = self.post_with_retry(&body).await?;
            parse_gemini_response(&text)
        }
        .instrument(span)
        .await
    }

    fn model(&self) -> &str {
        &self.model
    }
}
