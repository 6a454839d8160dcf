//! LLM provider abstraction
//!
//! Provides a common interface over OpenAI-compatible chat endpoints.

mod error;
mod models;
mod openai;
mod registry;
mod retry;
mod sse;
mod types;

#[cfg(test)]
mod proptests;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{LlmError, LlmErrorKind};
pub use models::ProviderDefaults;
pub use openai::OpenAIProvider;
pub use registry::{build_provider, ConfigError, LlmConfig, ProviderConfig};
pub use retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
pub use sse::{SseDecoder, SseFrame};
pub use types::*;

use crate::state::ProviderKind;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receiving end of a streaming completion. Closed by the producer after the
/// terminal chunk, on cancellation, or when the receiver goes away.
pub type ChunkReceiver = mpsc::Receiver<ChatStreamChunk>;

/// Common interface for LLM providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which backend this talks to
    fn name(&self) -> ProviderKind;

    /// Model used when a request does not name one
    fn model(&self) -> &str;

    /// Blocking completion, retried on transient failures
    async fn chat_completion(
        &self,
        cancel: CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError>;

    /// Open a stream. Only the open can fail here; later failures arrive as
    /// a terminal chunk carrying the error.
    async fn stream_chat_completion(
        &self,
        cancel: CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChunkReceiver, LlmError>;

    /// Model ids the server offers
    async fn models(&self, cancel: CancellationToken) -> Result<Vec<String>, LlmError>;
}

/// Logging wrapper for providers
pub struct LoggingProvider {
    inner: Arc<dyn Provider>,
}

impl LoggingProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self { inner }
    }

    fn requested_model<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        request.model.as_deref().unwrap_or_else(|| self.inner.model())
    }
}

#[async_trait]
impl Provider for LoggingProvider {
    fn name(&self) -> ProviderKind {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn chat_completion(
        &self,
        cancel: CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.chat_completion(cancel, request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    provider = %self.inner.name(),
                    model = %response.model,
                    duration_ms = %duration.as_millis(),
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    provider = %self.inner.name(),
                    model = %self.requested_model(request),
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    async fn stream_chat_completion(
        &self,
        cancel: CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChunkReceiver, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.stream_chat_completion(cancel, request).await;

        match &result {
            Ok(_) => {
                tracing::info!(
                    provider = %self.inner.name(),
                    model = %self.requested_model(request),
                    messages = request.messages.len(),
                    open_ms = %start.elapsed().as_millis(),
                    "LLM stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    provider = %self.inner.name(),
                    model = %self.requested_model(request),
                    error = %e.message,
                    cancelled = e.is_cancelled(),
                    "LLM stream failed to open"
                );
            }
        }

        result
    }

    async fn models(&self, cancel: CancellationToken) -> Result<Vec<String>, LlmError> {
        let result = self.inner.models(cancel).await;
        if let Err(e) = &result {
            tracing::warn!(provider = %self.inner.name(), error = %e.message, "Model listing failed");
        }
        result
    }
}
