//! Conversation state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Fallback user prompt when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an AI assistant that autonomously writes code and helps the user with programming tasks.";

/// Operating mode of the assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Plan,
    Execute,
    Yolo,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Plan => "plan",
            Mode::Execute => "execute",
            Mode::Yolo => "yolo",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(Mode::Plan),
            "execute" => Ok(Mode::Execute),
            "yolo" => Ok(Mode::Yolo),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// Model back-ends the client knows how to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    #[default]
    LmStudio,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::LmStudio => "lmstudio",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "lmstudio" | "lm-studio" => Ok(ProviderKind::LmStudio),
            other => Err(format!("unsupported provider: {other}")),
        }
    }
}

/// Token counters reported by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolCallFunction,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// JSON-encoded arguments, possibly still partial while streaming
    pub arguments: String,
}

/// Partial tool call carried by one stream chunk.
///
/// `index` identifies the call within the response; `id` and `name` usually
/// arrive on the first fragment only, `arguments` arrives in pieces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// Merge streamed fragments into accumulated tool calls, keyed by index.
///
/// `indices[i]` is the stream index of `calls[i]`. Calls without a recorded
/// index (hand-built or deserialized messages) never match a fragment and
/// come back tagged with `UNTRACKED_INDEX`.
pub fn merge_tool_call_deltas(
    calls: &[ToolCall],
    indices: &[u32],
    deltas: &[ToolCallDelta],
) -> (Vec<ToolCall>, Vec<u32>) {
    let mut calls = calls.to_vec();
    let mut slots: Vec<Option<u32>> = (0..calls.len())
        .map(|pos| indices.get(pos).copied().filter(|i| *i != UNTRACKED_INDEX))
        .collect();

    for delta in deltas {
        let pos = match slots.iter().position(|i| *i == Some(delta.index)) {
            Some(pos) => pos,
            None => {
                slots.push(Some(delta.index));
                calls.push(ToolCall::function("", "", ""));
                calls.len() - 1
            }
        };
        let Some(slot) = calls.get_mut(pos) else {
            continue;
        };

        if let Some(id) = &delta.id {
            if slot.id.is_empty() {
                slot.id.clone_from(id);
            }
        }
        if let Some(name) = &delta.name {
            if slot.function.name.is_empty() {
                slot.function.name.clone_from(name);
            }
        }
        slot.function.arguments.push_str(&delta.arguments);
    }

    let indices = slots
        .into_iter()
        .map(|i| i.unwrap_or(UNTRACKED_INDEX))
        .collect();
    (calls, indices)
}

/// Placeholder index for a tool call that did not come from a stream
pub const UNTRACKED_INDEX: u32 = u32::MAX;

/// A single conversation entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, rename = "toolCalls")]
    pub tool_calls: Vec<ToolCall>,
    /// Stream index of each entry in `tool_calls`
    #[serde(skip)]
    pub tool_call_indices: Vec<u32>,
    pub timestamp: DateTime<Utc>,
    /// Turn this message belongs to; shared by a turn's streamed chunks
    #[serde(default, rename = "turnId", skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<Uuid>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            usage: TokenUsage::default(),
            tool_calls: Vec::new(),
            tool_call_indices: Vec::new(),
            timestamp: Utc::now(),
            turn_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_turn(mut self, turn_id: Uuid) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Allow/deny lists; carried but not interpreted here
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// Conversation metadata and history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub mode: Mode,
    pub system_prompt: String,
    pub session_id: String,
    pub messages: Vec<Message>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub working_directory: PathBuf,
}

/// Active provider and model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub provider: ProviderKind,
    pub name: String,
    pub busy: bool,
}

/// Outcome of the last turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The single source of truth for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationState {
    pub permissions: Permissions,
    pub context: Context,
    pub model: Model,
    pub status: Status,
}

impl ApplicationState {
    /// Build the initial state. Empty arguments fall back to the defaults:
    /// the stock system prompt, the process working directory, and a
    /// timestamp-derived session id.
    pub fn new(system_prompt: &str, working_directory: Option<&Path>, session_id: &str) -> Self {
        let now = Utc::now();

        let system_prompt = if system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            system_prompt.to_string()
        };

        let working_directory = match working_directory {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        let session_id = if session_id.is_empty() {
            now.format("session-%Y%m%d%H%M%S").to_string()
        } else {
            session_id.to_string()
        };

        Self {
            permissions: Permissions::default(),
            context: Context {
                mode: Mode::default(),
                system_prompt,
                session_id,
                messages: Vec::new(),
                prompt_tokens: 0,
                completion_tokens: 0,
                created: now,
                updated: now,
                working_directory,
            },
            model: Model::default(),
            status: Status::default(),
        }
    }

    /// Most recent message, if any
    pub fn last_message(&self) -> Option<&Message> {
        self.context.messages.last()
    }
}
