//! `OpenAI`-compatible chat completions client
//!
//! Speaks the `/chat/completions` and `/models` endpoints shared by `OpenAI`,
//! LM Studio and other compatible servers. Blocking requests go through the
//! retry policy; streams are opened once and decoded on a dedicated task.

use super::registry::ProviderConfig;
use super::retry::RetryPolicy;
use super::sse::{SseDecoder, SseFrame};
use super::types::{ChatRequest, ChatResponse, ChatStreamChunk, ToolChoice};
use super::{ChunkReceiver, LlmError, Provider};
use crate::state::{Message, ProviderKind, Role, TokenUsage, ToolCall, ToolCallDelta};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;


/// OpenAI-compatible service implementation
pub struct OpenAIProvider {
    client: Client,
    kind: ProviderKind,
    config: ProviderConfig,
    retry: RetryPolicy,
    chat_url: String,
    models_url: String,
}

impl OpenAIProvider {
    pub fn new(kind: ProviderKind, config: ProviderConfig) -> Result<Self, LlmError> {
        let base = config.base_url.trim_end_matches('/');
        let chat_url = format!("{base}/chat/completions");
        let models_url = format!("{base}/models");

        // No overall timeout on the client: streams may legitimately run
        // longer than any single blocking request.
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        let retry = RetryPolicy::new(config.max_retries).with_base_delay(config.retry_base_delay);

        Ok(Self {
            client,
            kind,
            config,
            retry,
            chat_url,
            models_url,
        })
    }

    pub(super) fn translate_request(&self, request: &ChatRequest, stream: bool) -> OpenAIRequest {
        let mut messages: Vec<OpenAIMessage> =
            request.messages.iter().map(Self::translate_message).collect();

        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            let has_system = messages
                .first()
                .is_some_and(|m| m.role == Role::System.as_str());
            if !has_system {
                messages.insert(
                    0,
                    OpenAIMessage {
                        role: Role::System.as_str().to_string(),
                        content: Some(system.to_string()),
                        tool_calls: None,
                    },
                );
            }
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        let model = request
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.default_model.clone());

        OpenAIRequest {
            model,
            messages,
            max_tokens: request.max_tokens.filter(|n| *n > 0),
            temperature: request.temperature.filter(|t| *t > 0.0),
            stream: stream.then_some(true),
            tools,
            tool_choice: request.tool_choice.as_ref().map(OpenAIToolChoice::from),
        }
    }

    fn translate_message(msg: &Message) -> OpenAIMessage {
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|tc| OpenAIToolCall {
                        id: tc.id.clone(),
                        r#type: tc.kind.clone(),
                        function: OpenAIFunctionCall {
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        };

        // An assistant turn that only calls tools has no text
        let content = if msg.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(msg.content.clone())
        };

        OpenAIMessage {
            role: msg.role.as_str().to_string(),
            content,
            tool_calls,
        }
    }

    pub(super) fn normalize_response(resp: OpenAIResponse, duration: Duration) -> ChatResponse {
        let created_at = DateTime::from_timestamp(resp.created, 0).unwrap_or_else(Utc::now);
        let usage = resp.usage.map(TokenUsage::from).unwrap_or_default();

        let Some(choice) = resp.choices.into_iter().next() else {
            return ChatResponse {
                content: String::new(),
                tool_calls: Vec::new(),
                usage,
                model: resp.model,
                created_at,
                duration,
                finish_reason: None,
            };
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter(|tc| !tc.function.name.is_empty())
            .map(|tc| ToolCall {
                id: tc.id,
                kind: tc.r#type,
                function: crate::state::ToolCallFunction {
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                },
            })
            .collect();

        ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
            model: resp.model,
            created_at,
            duration,
            finish_reason: choice.finish_reason,
        }
    }

    /// Convert one decoded stream frame. Frames with neither a choice nor a
    /// usage report carry nothing worth forwarding.
    pub(super) fn normalize_chunk(resp: OpenAIStreamResponse) -> Result<Option<ChatStreamChunk>, LlmError> {
        if let Some(error) = resp.error {
            return Err(LlmError::stream(format!("stream error: {}", error.message)));
        }

        let usage = resp.usage.map(TokenUsage::from);
        let choice = resp.choices.into_iter().next();
        if choice.is_none() && usage.is_none() {
            return Ok(None);
        }

        let mut chunk = ChatStreamChunk {
            model: resp.model,
            usage,
            ..ChatStreamChunk::default()
        };

        if let Some(choice) = choice {
            chunk.delta = choice.delta.content.unwrap_or_default();
            chunk.finish_reason = choice.finish_reason;
            chunk.tool_calls = choice
                .delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| {
                    let (name, arguments) = match tc.function {
                        Some(f) => (f.name, f.arguments.unwrap_or_default()),
                        None => (None, String::new()),
                    };
                    ToolCallDelta {
                        index: tc.index,
                        id: tc.id,
                        name,
                        arguments,
                    }
                })
                .collect();
        }

        Ok(Some(chunk))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.config.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }

    /// One blocking chat completion attempt
    async fn send_chat(&self, body: &OpenAIRequest) -> Result<OpenAIResponse, LlmError> {
        let response = self
            .authorized(self.client.post(&self.chat_url))
            .timeout(self.config.timeout)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let retry_after = retry_after(&response);
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status, &text, retry_after));
        }

        serde_json::from_str(&text).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {text}"))
        })
    }

    /// Send a streaming request and hand back the live response
    async fn open_stream(&self, body: &OpenAIRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .authorized(self.client.post(&self.chat_url))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after(&response);
        let text = response.text().await.unwrap_or_default();
        Err(status_error(status, &text, retry_after))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let response = self
            .authorized(self.client.get(&self.models_url))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let retry_after = retry_after(&response);
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(status, &text, retry_after));
        }

        let list: OpenAIModelList = serde_json::from_str(&text).map_err(|e| {
            LlmError::unknown(format!("Failed to parse model list: {e} - body: {text}"))
        })?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.config.default_model
    }

    async fn chat_completion(
        &self,
        cancel: CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let body = &self.translate_request(request, false);
        let token = &cancel;
        let start = Instant::now();

        let response = self
            .retry
            .run(&cancel, || async move {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(LlmError::cancelled()),
                    result = self.send_chat(body) => result,
                }
            })
            .await
            .map_err(|e| e.context("chat completion failed"))?;

        Ok(Self::normalize_response(response, start.elapsed()))
    }

    async fn stream_chat_completion(
        &self,
        cancel: CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChunkReceiver, LlmError> {
        let body = self.translate_request(request, true);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LlmError::cancelled()),
            result = self.open_stream(&body) => result,
        }
        .map_err(|e| e.context("stream creation failed"))?;

        // Capacity one: the decoder stays at most a single chunk ahead
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(decode_stream(response, cancel, tx));
        Ok(rx)
    }

    async fn models(&self, cancel: CancellationToken) -> Result<Vec<String>, LlmError> {
        let token = &cancel;
        self.retry
            .run(&cancel, || async move {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(LlmError::cancelled()),
                    result = self.list_models() => result,
                }
            })
            .await
            .map_err(|e| e.context("model listing failed"))
    }
}

/// Drive one streaming response to completion.
///
/// Owns the response body and the sender, so both are released exactly once
/// whichever way this returns.
async fn decode_stream(
    response: reqwest::Response,
    cancel: CancellationToken,
    tx: mpsc::Sender<ChatStreamChunk>,
) {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut forwarded = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(forwarded, "Stream cancelled");
                return;
            }
            next = body.next() => next,
        };

        let (frames, end_of_body) = match next {
            Some(Ok(bytes)) => match decoder.push(&bytes) {
                Ok(frames) => (frames, false),
                Err(error) => {
                    tracing::warn!(forwarded, error = %error, "Stream line overflow");
                    forward(&tx, &cancel, ChatStreamChunk::failed(error)).await;
                    return;
                }
            },
            Some(Err(e)) => {
                let error = LlmError::stream(format!("stream error: {e}"));
                tracing::warn!(forwarded, error = %error, "Stream read failed");
                forward(&tx, &cancel, ChatStreamChunk::failed(error)).await;
                return;
            }
            None => (decoder.finish().into_iter().collect(), true),
        };

        for frame in frames {
            let json = match frame {
                SseFrame::Done => {
                    tracing::debug!(forwarded, "Stream finished");
                    forward(&tx, &cancel, ChatStreamChunk::finished()).await;
                    return;
                }
                SseFrame::Data(json) => json,
            };

            let decoded = serde_json::from_str::<OpenAIStreamResponse>(&json)
                .map_err(|e| LlmError::stream(format!("failed to decode stream chunk: {e}")))
                .and_then(OpenAIProvider::normalize_chunk);

            match decoded {
                Ok(Some(chunk)) => {
                    if !forward(&tx, &cancel, chunk).await {
                        return;
                    }
                    forwarded += 1;
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(forwarded, error = %error, "Stream decode failed");
                    forward(&tx, &cancel, ChatStreamChunk::failed(error)).await;
                    return;
                }
            }
        }

        if end_of_body {
            tracing::debug!(forwarded, "Stream ended without [DONE]");
            forward(&tx, &cancel, ChatStreamChunk::finished()).await;
            return;
        }
    }
}

/// Hand a chunk to the consumer unless cancellation fires first. Returns
/// false when the stream should stop.
async fn forward(
    tx: &mpsc::Sender<ChatStreamChunk>,
    cancel: &CancellationToken,
    chunk: ChatStreamChunk,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(chunk) => sent.is_ok(),
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        LlmError::network(format!("Connection failed: {e}"))
    } else {
        LlmError::unknown(format!("Request failed: {e}"))
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Classify a non-success HTTP response
fn status_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> LlmError {
    let Ok(parsed) = serde_json::from_str::<OpenAIErrorResponse>(body) else {
        let error = if status.is_server_error() {
            LlmError::server_error(format!("HTTP {status} error: {body}"))
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            LlmError::rate_limit(format!("HTTP {status} error: {body}"))
        } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            LlmError::auth(format!("Authentication failed: HTTP {status}"))
        } else {
            LlmError::unknown(format!("HTTP {status} error: {body}"))
        };
        return match retry_after {
            Some(d) => error.with_retry_after(d),
            None => error,
        };
    };

    let code = parsed.error.code_str();
    let message = match &code {
        Some(code) => format!("{} ({code})", parsed.error.message),
        None => parsed.error.message,
    };

    let error = match (status.as_u16(), code.as_deref()) {
        (_, Some("invalid_api_key")) | (401 | 403, _) => {
            LlmError::auth(format!("Authentication failed: {message}"))
        }
        (_, Some("model_not_found")) => LlmError::model_not_found(format!("Model not found: {message}")),
        (429, _) => LlmError::rate_limit(format!("Rate limit exceeded: {message}")),
        (400..=499, _) => LlmError::invalid_request(format!("Invalid request: {message}")),
        (500..=599, _) => LlmError::server_error(format!("Server error: {message}")),
        _ => LlmError::unknown(format!("HTTP {status}: {message}")),
    };

    match retry_after {
        Some(d) => error.with_retry_after(d),
        None => error,
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
pub(super) struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<OpenAIToolChoice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAIToolChoice {
    Mode(&'static str),
    Function {
        r#type: &'static str,
        function: OpenAIFunctionName,
    },
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionName {
    name: String,
}

impl From<&ToolChoice> for OpenAIToolChoice {
    fn from(choice: &ToolChoice) -> Self {
        match choice {
            ToolChoice::Auto => OpenAIToolChoice::Mode("auto"),
            ToolChoice::None => OpenAIToolChoice::Mode("none"),
            ToolChoice::Required => OpenAIToolChoice::Mode("required"),
            ToolChoice::Function(name) => OpenAIToolChoice::Function {
                r#type: "function",
                function: OpenAIFunctionName { name: name.clone() },
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<OpenAIUsage> for TokenUsage {
    fn from(u: OpenAIUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIStreamResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIModelList {
    #[serde(default)]
    data: Vec<OpenAIModelEntry>,
}

#[derive(Debug, Deserialize)]
struct OpenAIModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
    #[allow(dead_code)]
    #[serde(default)]
    r#type: Option<String>,
    /// String on `OpenAI`, sometimes numeric elsewhere
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl OpenAIError {
    fn code_str(&self) -> Option<String> {
        match self.code.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}
