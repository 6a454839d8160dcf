//! One user-message-to-reply cycle

use super::{Agent, AgentStatus};
use crate::llm::ChatRequest;
use crate::state::{Action, ApplicationState, ChunkUpdate, Message, Role};
use crate::system_prompt::build_system_prompt;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CANCELLED: &str = "cancelled";

impl Agent {
    pub(super) async fn run_turn(&self, message: Message, cancel: CancellationToken) {
        let turn_id = Uuid::new_v4();

        let start = Action::StartTurn {
            turn_id,
            role: message.role,
            content: message.content,
            timestamp: message.timestamp,
        };
        if let Err(e) = self.store.dispatch(start) {
            // Nothing was started, so there is nothing to complete
            tracing::warn!(turn_id = %turn_id, error = %e, "Turn rejected");
            self.sink.send(AgentStatus::failed(turn_id, e.to_string()));
            return;
        }

        let snapshot = self.store.snapshot();
        self.sink
            .send(AgentStatus::progress(turn_id, snapshot.last_message().cloned()));

        let request = build_request(&snapshot);
        tracing::debug!(turn_id = %turn_id, messages = request.messages.len(), "Opening stream");

        let mut chunks = match self.provider.stream_chat_completion(cancel.clone(), &request).await {
            Ok(rx) => rx,
            Err(e) if e.is_cancelled() => return self.fail_turn(turn_id, CANCELLED),
            Err(e) => return self.fail_turn(turn_id, e.to_string()),
        };

        let reply_started = Utc::now();
        let mut reply = None;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return self.fail_turn(turn_id, CANCELLED),
                chunk = chunks.recv() => chunk,
            };

            // Closed without a terminal chunk: treat as a clean end
            let Some(chunk) = chunk else {
                break;
            };

            if let Some(error) = &chunk.error {
                return self.fail_turn(turn_id, error.to_string());
            }

            let done = chunk.done;
            if !chunk.is_empty() {
                let update = ChunkUpdate {
                    turn_id,
                    role: Role::Assistant,
                    delta: chunk.delta,
                    timestamp: reply_started,
                    usage: chunk.usage,
                    tool_calls: chunk.tool_calls,
                };
                if let Err(e) = self.store.dispatch(Action::AppendChunk(update)) {
                    return self.fail_turn(turn_id, e.to_string());
                }

                reply = reply_message(&self.store.snapshot(), turn_id);
                self.sink.send(AgentStatus::progress(turn_id, reply.clone()));
            }

            if done {
                break;
            }
        }

        self.complete_turn(turn_id, reply);
    }

    fn complete_turn(&self, turn_id: Uuid, reply: Option<Message>) {
        let action = Action::CompleteTurn {
            turn_id: Some(turn_id),
            success: true,
            message: reply.clone(),
            error: None,
        };
        if let Err(e) = self.store.dispatch(action) {
            tracing::error!(turn_id = %turn_id, error = %e, "Failed to complete turn");
        }

        tracing::info!(
            turn_id = %turn_id,
            reply_len = reply.as_ref().map_or(0, |m| m.content.len()),
            "Turn completed"
        );
        self.sink.send(AgentStatus::finished(turn_id, reply));
    }

    fn fail_turn(&self, turn_id: Uuid, error: impl Into<String>) {
        let error = error.into();
        let action = Action::CompleteTurn {
            turn_id: Some(turn_id),
            success: false,
            message: None,
            error: Some(error.clone()),
        };
        if let Err(e) = self.store.dispatch(action) {
            tracing::error!(turn_id = %turn_id, error = %e, "Failed to record turn failure");
        }

        tracing::warn!(turn_id = %turn_id, error = %error, "Turn failed");
        self.sink.send(AgentStatus::failed(turn_id, error));
    }
}

/// Request for the next reply, built from a post-`StartTurn` snapshot
fn build_request(state: &ApplicationState) -> ChatRequest {
    let request = ChatRequest::new(state.context.messages.clone())
        .with_system_prompt(build_system_prompt(state));
    if state.model.name.is_empty() {
        request
    } else {
        request.with_model(state.model.name.clone())
    }
}

/// The turn's accumulated assistant message
fn reply_message(state: &ApplicationState, turn_id: Uuid) -> Option<Message> {
    state
        .context
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && m.turn_id == Some(turn_id))
        .cloned()
}
