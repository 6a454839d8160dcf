//! State transitions
//!
//! Every change to [`ApplicationState`] is described by an [`Action`] and
//! applied through [`Action::execute`], a pure function from the old state to
//! a new one. The input is never modified in place.

use super::types::{
    merge_tool_call_deltas, ApplicationState, Message, Mode, ProviderKind, Role, TokenUsage,
    ToolCallDelta,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Closed set of state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A turn begins: marks the model busy and records the inbound message
    StartTurn {
        turn_id: Uuid,
        role: Role,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// One streamed fragment of the reply for `turn_id`
    AppendChunk(ChunkUpdate),
    /// The turn ended, successfully or not
    CompleteTurn {
        turn_id: Option<Uuid>,
        success: bool,
        message: Option<Message>,
        error: Option<String>,
    },
    /// Append a complete message outside of a streamed turn
    AppendMessage(Message),
    ClearHistory,
    ChangeProviderSettings {
        provider: ProviderKind,
        model: String,
    },
    ChangeMode(Mode),
    Terminate {
        reason: String,
    },
}

/// Payload of [`Action::AppendChunk`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkUpdate {
    pub turn_id: Uuid,
    pub role: Role,
    pub delta: String,
    /// Start time of the reply; shared by every chunk of the turn
    pub timestamp: DateTime<Utc>,
    pub usage: Option<TokenUsage>,
    pub tool_calls: Vec<ToolCallDelta>,
}

/// Errors that can occur while applying an action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("model is busy, cannot start a new turn")]
    ModelBusy,
    #[error("message content is empty")]
    EmptyMessage,
    #[error("model name must not be empty")]
    EmptyModelName,
}

impl Action {
    /// Short, stable name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Action::StartTurn { .. } => "start_turn",
            Action::AppendChunk(_) => "append_chunk",
            Action::CompleteTurn { .. } => "complete_turn",
            Action::AppendMessage(_) => "append_message",
            Action::ClearHistory => "clear_history",
            Action::ChangeProviderSettings { .. } => "change_provider_settings",
            Action::ChangeMode(_) => "change_mode",
            Action::Terminate { .. } => "terminate",
        }
    }

    /// Apply this action to `state`, producing the next state.
    pub fn execute(&self, state: &ApplicationState) -> Result<ApplicationState, ActionError> {
        let mut next = state.clone();

        match self {
            Action::StartTurn {
                turn_id,
                role,
                content,
                timestamp,
            } => {
                if state.model.busy {
                    return Err(ActionError::ModelBusy);
                }
                if content.trim().is_empty() {
                    return Err(ActionError::EmptyMessage);
                }
                next.model.busy = true;
                next.status.error = None;
                next.context.messages.push(
                    Message::new(*role, content.clone())
                        .with_timestamp(*timestamp)
                        .with_turn(*turn_id),
                );
            }

            Action::AppendChunk(chunk) => apply_chunk(&mut next, chunk),

            Action::CompleteTurn {
                success,
                message,
                error,
                ..
            } => {
                next.model.busy = false;
                if let Some(message) = message {
                    next.context.prompt_tokens += u64::from(message.usage.prompt_tokens);
                    next.context.completion_tokens += u64::from(message.usage.completion_tokens);
                }
                next.status.error = if *success {
                    None
                } else {
                    Some(error.clone().unwrap_or_else(|| "turn failed".to_string()))
                };
            }

            Action::AppendMessage(message) => {
                next.context.messages.push(message.clone());
            }

            Action::ClearHistory => {
                next.context.messages.clear();
                next.context.prompt_tokens = 0;
                next.context.completion_tokens = 0;
            }

            Action::ChangeProviderSettings { provider, model } => {
                if model.trim().is_empty() {
                    return Err(ActionError::EmptyModelName);
                }
                next.model.provider = *provider;
                next.model.name.clone_from(model);
            }

            Action::ChangeMode(mode) => {
                next.context.mode = *mode;
            }

            // Observers react to this one; the state itself is unchanged
            Action::Terminate { .. } => {}
        }

        Ok(next)
    }
}

/// Replace the turn's in-flight message with one carrying the accumulated
/// content, or append a fresh message when the turn has none yet.
fn apply_chunk(state: &mut ApplicationState, chunk: &ChunkUpdate) {
    let messages = &mut state.context.messages;

    let existing = messages
        .iter()
        .rposition(|m| m.role == chunk.role && m.turn_id == Some(chunk.turn_id));

    match existing {
        Some(idx) => {
            let prior = &messages[idx];
            let (tool_calls, tool_call_indices) =
                merge_tool_call_deltas(&prior.tool_calls, &prior.tool_call_indices, &chunk.tool_calls);
            let replacement = Message {
                role: chunk.role,
                content: format!("{}{}", prior.content, chunk.delta),
                usage: chunk.usage.unwrap_or(prior.usage),
                tool_calls,
                tool_call_indices,
                timestamp: prior.timestamp,
                turn_id: Some(chunk.turn_id),
            };
            messages[idx] = replacement;
        }
        None => {
            let (tool_calls, tool_call_indices) = merge_tool_call_deltas(&[], &[], &chunk.tool_calls);
            messages.push(Message {
                role: chunk.role,
                content: chunk.delta.clone(),
                usage: chunk.usage.unwrap_or_default(),
                tool_calls,
                tool_call_indices,
                timestamp: chunk.timestamp,
                turn_id: Some(chunk.turn_id),
            });
        }
    }
}
