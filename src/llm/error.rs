//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Substrings in a service error that mark it as not worth retrying
const NON_RETRYABLE_MARKERS: &[&str] = &["invalid_api_key", "model_not_found"];

/// LLM error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
    #[source]
    pub source: Option<Box<LlmError>>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            source: None,
        }
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn cancelled() -> Self {
        Self::new(LlmErrorKind::Cancelled, "request cancelled")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Auth, message)
    }

    pub fn model_not_found(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ModelNotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Stream, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Aggregate error after every attempt failed; keeps the last failure
    /// as its source and inherits its kind.
    pub fn retries_exhausted(attempts: u32, last: LlmError) -> Self {
        Self {
            kind: last.kind,
            message: format!("request failed after {attempts} retries: {last}"),
            retry_after: None,
            source: Some(Box::new(last)),
        }
    }

    /// Prefix the message with `context`, keeping the classification
    #[must_use]
    pub fn context(self, context: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("{context}: {}", self.message),
            retry_after: self.retry_after,
            source: Some(Box::new(self)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == LlmErrorKind::Cancelled
    }

    /// Whether another attempt could succeed. Cancellation, rejected
    /// credentials and unknown models never recover.
    pub fn is_retryable(&self) -> bool {
        if !self.kind.is_retryable() {
            return false;
        }
        !NON_RETRYABLE_MARKERS
            .iter()
            .any(|marker| self.message.contains(marker))
    }
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Caller cancelled - never retried
    Cancelled,
    /// Network issues, timeouts - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Authentication failed (401, 403) - not retryable
    Auth,
    /// Requested model does not exist - not retryable
    ModelNotFound,
    /// Other 4xx - retryable
    InvalidRequest,
    /// Malformed or interrupted stream
    Stream,
    /// Unknown error
    Unknown,
}

impl LlmErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Cancelled | Self::Auth | Self::ModelNotFound)
    }
}
