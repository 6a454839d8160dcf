//! Application state
//!
//! Value types describing a session, the actions that transform them, and
//! the store that serializes those transformations.

pub mod action;
pub mod store;
pub mod types;

#[cfg(test)]
mod proptests;

pub use action::{Action, ActionError, ChunkUpdate};
pub use store::{DispatchError, StateChange, StateChangeHandler, StateStore};
pub use types::{
    ApplicationState, Context, Message, Mode, Model, Permissions, ProviderKind, Role, Status,
    TokenUsage, ToolCall, ToolCallDelta, ToolCallFunction, DEFAULT_SYSTEM_PROMPT,
};
