//! tai - terminal conversation core
//!
//! A single-writer state store driven by actions, a resilient streaming
//! chat-completion client for OpenAI-compatible servers, and the agent that
//! binds them into turns.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod agent;
pub mod cli;
pub mod llm;
pub mod state;
pub mod system_prompt;
