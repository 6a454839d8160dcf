//! Common types for LLM interactions

use super::LlmError;
use crate::state::{Message, TokenUsage, ToolCall, ToolCallDelta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat completion request
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Target model; the provider's default when `None`
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Prepended as a system message unless the history already starts with one
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Tool definition for the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: serde_json::Value,
}

/// Whether and how the model may call tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    /// Force a call to the named function
    Function(String),
}

/// Chat completion response
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub model: String,
    pub created_at: DateTime<Utc>,
    /// Wall-clock time spent, retries included
    pub duration: Duration,
    pub finish_reason: Option<String>,
}

/// One fragment of a streaming response
#[derive(Debug, Clone, Default)]
pub struct ChatStreamChunk {
    pub model: Option<String>,
    pub delta: String,
    pub tool_calls: Vec<ToolCallDelta>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    /// Set on the last chunk of the stream
    pub done: bool,
    /// Terminal error; always paired with `done`
    pub error: Option<LlmError>,
}

impl ChatStreamChunk {
    /// End-of-stream marker
    pub fn finished() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    /// Terminal chunk reporting a failure
    pub fn failed(error: LlmError) -> Self {
        Self {
            done: true,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_empty() && self.tool_calls.is_empty() && self.usage.is_none()
    }
}
