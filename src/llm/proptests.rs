//! Property-based tests for the wire translation and error classification
//!
//! - Request translation keeps every message, in order, and adds the system
//!   prompt at most once
//! - Response normalization preserves content and named tool calls
//! - Concatenated stream deltas equal the text that was streamed
//! - Wrapping never changes whether an error is retried

#![allow(clippy::redundant_closure_for_method_calls)]

use super::openai::{OpenAIProvider, OpenAIResponse, OpenAIStreamResponse};
use super::registry::ProviderConfig;
use super::{ChatRequest, LlmError, LlmErrorKind};
use crate::state::{Message, ProviderKind, Role};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Strategies
// ============================================================================

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::User),
        Just(Role::Assistant),
        Just(Role::System),
        Just(Role::Tool),
    ]
}

fn arb_message() -> impl Strategy<Value = Message> {
    (arb_role(), "[a-zA-Z0-9 _.!?,]{1,60}").prop_map(|(role, content)| Message::new(role, content))
}

fn arb_kind() -> impl Strategy<Value = LlmErrorKind> {
    prop_oneof![
        Just(LlmErrorKind::Cancelled),
        Just(LlmErrorKind::Network),
        Just(LlmErrorKind::RateLimit),
        Just(LlmErrorKind::ServerError),
        Just(LlmErrorKind::Auth),
        Just(LlmErrorKind::ModelNotFound),
        Just(LlmErrorKind::InvalidRequest),
        Just(LlmErrorKind::Stream),
        Just(LlmErrorKind::Unknown),
    ]
}

fn provider() -> OpenAIProvider {
    let config = ProviderConfig {
        api_key: "k".to_string(),
        base_url: "http://localhost:1234/v1".to_string(),
        default_model: "m".to_string(),
        timeout: Duration::from_secs(1),
        max_retries: 3,
        retry_base_delay: Duration::from_millis(1),
    };
    OpenAIProvider::new(ProviderKind::LmStudio, config).unwrap()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_translation_preserves_messages(
        messages in proptest::collection::vec(arb_message(), 0..8),
        system in proptest::option::of("[a-zA-Z ]{1,40}"),
    ) {
        let mut request = ChatRequest::new(messages.clone());
        request.system_prompt.clone_from(&system);
        let wire = serde_json::to_value(provider().translate_request(&request, false)).unwrap();
        let wire = wire["messages"].as_array().unwrap().clone();

        let starts_with_system = messages.first().is_some_and(|m| m.role == Role::System);
        let prepended = system.is_some() && !starts_with_system;
        prop_assert_eq!(wire.len(), messages.len() + usize::from(prepended));

        let offset = usize::from(prepended);
        if prepended {
            prop_assert_eq!(wire[0]["role"].as_str(), Some("system"));
            prop_assert_eq!(wire[0]["content"].as_str(), system.as_deref());
        }
        for (i, msg) in messages.iter().enumerate() {
            prop_assert_eq!(wire[i + offset]["role"].as_str(), Some(msg.role.as_str()));
            prop_assert_eq!(wire[i + offset]["content"].as_str(), Some(msg.content.as_str()));
        }
    }

    #[test]
    fn prop_response_keeps_content_and_named_calls(
        content in "[a-zA-Z0-9 ]{0,80}",
        names in proptest::collection::vec(proptest::option::of("[a-z_]{1,12}"), 0..4),
    ) {
        let calls: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, name)| json!({
                "id": format!("call_{i}"),
                "type": "function",
                "function": { "name": name.clone().unwrap_or_default(), "arguments": "{}" },
            }))
            .collect();
        let raw: OpenAIResponse = serde_json::from_value(json!({
            "model": "m",
            "created": 0,
            "choices": [{ "message": { "role": "assistant", "content": content, "tool_calls": calls } }],
        }))
        .unwrap();

        let resp = OpenAIProvider::normalize_response(raw, Duration::ZERO);
        prop_assert_eq!(&resp.content, &content);
        let named = names.iter().filter(|n| n.is_some()).count();
        prop_assert_eq!(resp.tool_calls.len(), named);
        prop_assert!(resp.tool_calls.iter().all(|c| !c.function.name.is_empty()));
    }

    #[test]
    fn prop_stream_deltas_concatenate(
        deltas in proptest::collection::vec("[a-zA-Z0-9 .,]{0,20}", 1..15),
    ) {
        let mut text = String::new();
        for delta in &deltas {
            let frame: OpenAIStreamResponse = serde_json::from_value(json!({
                "model": "m",
                "choices": [{ "index": 0, "delta": { "content": delta } }],
            }))
            .unwrap();
            let chunk = OpenAIProvider::normalize_chunk(frame).unwrap().unwrap();
            prop_assert!(!chunk.done);
            text.push_str(&chunk.delta);
        }
        prop_assert_eq!(text, deltas.concat());
    }

    #[test]
    fn prop_wrapping_preserves_retryability(
        kind in arb_kind(),
        message in "[a-z ]{0,30}",
        context in "[a-z ]{1,20}",
        attempts in 1u32..6,
    ) {
        let base = LlmError::new(kind, message);
        let wrapped = base.clone().context(&context);
        prop_assert_eq!(wrapped.kind, base.kind);
        prop_assert_eq!(wrapped.is_retryable(), base.is_retryable());

        let exhausted = LlmError::retries_exhausted(attempts, base.clone());
        prop_assert_eq!(exhausted.kind, kind);
        let expected_prefix = format!("request failed after {attempts} retries: ");
        prop_assert!(exhausted.to_string().starts_with(&expected_prefix));
    }
}
