//! In-process OpenAI-compatible server for tests

use super::registry::ProviderConfig;
use super::OpenAIProvider;
use crate::state::ProviderKind;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the server answers with. The last queued reply repeats forever.
#[derive(Debug, Clone)]
pub enum MockReply {
    Json {
        status: u16,
        body: Value,
        retry_after: Option<u64>,
    },
    /// Each string is sent as its own body chunk, `delay` apart
    Sse { frames: Vec<String>, delay: Duration },
    /// Never answers within a test's lifetime
    Hang,
}

impl MockReply {
    pub fn ok(body: Value) -> Self {
        MockReply::Json {
            status: 200,
            body,
            retry_after: None,
        }
    }

    pub fn error(status: u16, message: &str, code: Option<&str>) -> Self {
        MockReply::Json {
            status,
            body: json!({ "error": { "message": message, "type": "error", "code": code } }),
            retry_after: None,
        }
    }

    /// A complete stream: one content frame per delta, then `[DONE]`
    pub fn stream(deltas: &[&str], delay: Duration) -> Self {
        let mut frames: Vec<String> = deltas.iter().map(|d| content_frame(d)).collect();
        frames.push("data: [DONE]\n\n".to_string());
        MockReply::Sse { frames, delay }
    }
}

/// `data:` line carrying one content delta
pub fn content_frame(delta: &str) -> String {
    let body = json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "model": "test-model",
        "choices": [{ "index": 0, "delta": { "content": delta }, "finish_reason": null }],
    });
    format!("data: {body}\n\n")
}

/// A non-streaming completion body
pub fn completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 },
    })
}

struct Shared {
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

pub struct MockServer {
    pub base_url: String,
    shared: Arc<Shared>,
    task: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(replies: Vec<MockReply>) -> Self {
        let shared = Arc::new(Shared {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", post(handle))
            .route("/v1/models", get(handle))
            .with_state(Arc::clone(&shared));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/v1"),
            shared,
            task,
        }
    }

    /// Number of requests received so far
    pub fn calls(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// JSON bodies of the requests received so far
    pub fn bodies(&self) -> Vec<Value> {
        self.shared.bodies.lock().unwrap().clone()
    }

    /// Provider pointed at this server, with millisecond backoff
    pub fn provider(&self, max_retries: u32) -> OpenAIProvider {
        let config = ProviderConfig {
            api_key: "test-key".to_string(),
            base_url: self.base_url.clone(),
            default_model: "test-model".to_string(),
            timeout: Duration::from_secs(5),
            max_retries,
            retry_base_delay: Duration::from_millis(10),
        };
        OpenAIProvider::new(ProviderKind::LmStudio, config).unwrap()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(State(shared): State<Arc<Shared>>, body: Bytes) -> Response {
    shared.calls.fetch_add(1, Ordering::SeqCst);
    if let Ok(value) = serde_json::from_slice::<Value>(&body) {
        shared.bodies.lock().unwrap().push(value);
    }

    let reply = {
        let mut replies = shared.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        }
    };

    match reply {
        Some(MockReply::Json {
            status,
            body,
            retry_after,
        }) => {
            let status = StatusCode::from_u16(status).unwrap();
            let mut response = (status, axum::Json(body)).into_response();
            if let Some(secs) = retry_after {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, secs.to_string().parse().unwrap());
            }
            response
        }
        Some(MockReply::Sse { frames, delay }) => {
            let stream = futures::stream::iter(frames).then(move |frame| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, Infallible>(frame)
            });
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(stream))
                .unwrap()
        }
        Some(MockReply::Hang) => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
