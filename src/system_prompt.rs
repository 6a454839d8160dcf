//! System prompt construction
//!
//! Combines a fixed base prompt, a block describing the active session, and
//! the user-supplied prompt from the state.

use crate::state::ApplicationState;
use std::fmt::Write;

/// Base system prompt establishing the assistant's role
const BASE_PROMPT: &str = r"You are Tai, a terminal based assistant that helps people work with their computer and write code using natural language.

## Tone & Style
- Be direct and concise. Stay on task.
- Format responses as GitHub-flavored markdown suited to a terminal.
- Explain non-trivial shell commands, especially ones that modify the system.
- If you cannot help, say so in one or two sentences and offer an alternative.
- Keep answers short unless more detail is requested.
- Ask clarifying questions when a request is ambiguous.

## Conventions
- Before changing code, read the surrounding code and follow its conventions.
- Never assume a library is available; check the project's manifests first.
- Never expose or log secrets.";

/// Heading that introduces the user's own instructions
const USER_PROMPT_HEADING: &str = "## User Instructions
Follow these closely, except where they conflict with the instructions above.";

/// Build the full system prompt for the given state.
pub fn build_system_prompt(state: &ApplicationState) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    prompt.push_str("\n\n## Active Session\n");
    let _ = writeln!(prompt, "- Session ID: {}", state.context.session_id);
    let _ = writeln!(
        prompt,
        "- Current time: {}",
        state.context.updated.format("%B %-d, %Y %-I:%M:%S%.3f %p UTC")
    );
    let _ = writeln!(
        prompt,
        "- Working directory: {}",
        state.context.working_directory.display()
    );
    let _ = writeln!(prompt, "- Mode: {}", state.context.mode.as_str());
    if !state.model.name.is_empty() {
        let _ = writeln!(
            prompt,
            "- Model: {} via {}",
            state.model.name, state.model.provider
        );
    }

    let user_prompt = state.context.system_prompt.trim();
    if !user_prompt.is_empty() {
        prompt.push('\n');
        prompt.push_str(USER_PROMPT_HEADING);
        prompt.push_str("\n\n");
        prompt.push_str(user_prompt);
        prompt.push('\n');
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ApplicationState, ProviderKind};
    use std::path::Path;

    fn state() -> ApplicationState {
        ApplicationState::new("You are a poet", Some(Path::new("/work/project")), "sess-1")
    }

    #[test]
    fn test_build_system_prompt_includes_session_details() {
        let prompt = build_system_prompt(&state());

        assert!(prompt.starts_with("You are Tai"));
        assert!(prompt.contains("Session ID: sess-1"));
        assert!(prompt.contains("Working directory: /work/project"));
        assert!(prompt.contains("Mode: plan"));
        assert!(prompt.trim_end().ends_with("You are a poet"));
    }

    #[test]
    fn test_model_line_only_when_model_set() {
        let mut s = state();
        assert!(!build_system_prompt(&s).contains("- Model:"));

        s.model.name = "gemma-3n-e4b-it".into();
        s.model.provider = ProviderKind::LmStudio;
        assert!(build_system_prompt(&s).contains("- Model: gemma-3n-e4b-it via lmstudio"));
    }

    #[test]
    fn test_blank_user_prompt_omits_heading() {
        let mut s = state();
        s.context.system_prompt = "   ".into();
        assert!(!build_system_prompt(&s).contains("User Instructions"));
    }
}
