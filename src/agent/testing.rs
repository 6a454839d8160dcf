//! Mock provider for orchestrator tests

use crate::llm::{
    ChatRequest, ChatResponse, ChatStreamChunk, ChunkReceiver, LlmError, Provider,
};
use crate::state::{ProviderKind, TokenUsage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Scripted outcome of one `stream_chat_completion` call
#[derive(Debug, Clone)]
pub enum MockStream {
    /// Chunks delivered `delay` apart; no terminal chunk is added
    Chunks {
        chunks: Vec<ChatStreamChunk>,
        delay: Duration,
    },
    OpenError(LlmError),
}

impl MockStream {
    /// Content chunks followed by the terminal chunk
    pub fn text(deltas: &[&str]) -> Self {
        Self::text_with_delay(deltas, Duration::ZERO)
    }

    pub fn text_with_delay(deltas: &[&str], delay: Duration) -> Self {
        let mut chunks: Vec<ChatStreamChunk> = deltas
            .iter()
            .map(|d| ChatStreamChunk {
                delta: (*d).to_string(),
                ..ChatStreamChunk::default()
            })
            .collect();
        chunks.push(ChatStreamChunk::finished());
        MockStream::Chunks { chunks, delay }
    }
}

pub struct MockProvider {
    model: String,
    script: Mutex<VecDeque<MockStream>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn new(script: Vec<MockStream>) -> Self {
        Self {
            model: "mock-model".to_string(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> ProviderKind {
        ProviderKind::LmStudio
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(
        &self,
        _cancel: CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ChatResponse {
            content: "mock response".to_string(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            model: self.model.clone(),
            created_at: Utc::now(),
            duration: Duration::ZERO,
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn stream_chat_completion(
        &self,
        cancel: CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChunkReceiver, LlmError> {
        self.requests.lock().unwrap().push(request.clone());

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockStream::text(&[]));

        let (chunks, delay) = match next {
            MockStream::OpenError(e) => return Err(e.context("stream creation failed")),
            MockStream::Chunks { chunks, delay } => (chunks, delay),
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for chunk in chunks {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    sent = tx.send(chunk) => if sent.is_err() { return },
                }
            }
        });
        Ok(rx)
    }

    async fn models(&self, _cancel: CancellationToken) -> Result<Vec<String>, LlmError> {
        Ok(vec![self.model.clone()])
    }
}
