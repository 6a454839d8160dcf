//! Terminal front ends: one-shot and line-mode interactive

use crate::agent::{Agent, AgentError, AgentHandle, AgentStatus};
use crate::llm::{build_provider, ChatRequest, ConfigError, LlmConfig, LlmError, Provider};
use crate::state::{
    Action, ApplicationState, DispatchError, Message, Mode, Role, StateStore,
};
use crate::system_prompt::build_system_prompt;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read from stdin: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to get chat completion:\n\t{0}")]
    Completion(#[from] LlmError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Session settings read from the environment
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub working_directory: Option<PathBuf>,
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self {
            system_prompt: std::env::var("TAI_SYSTEM_PROMPT").unwrap_or_default(),
            working_directory: std::env::var_os("TAI_WORKING_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Entry point behind `main`: no arguments starts the interactive loop,
/// anything else is a one-shot prompt.
pub async fn run(args: Vec<String>) -> Result<(), CliError> {
    let llm_config = LlmConfig::from_env()?;
    let provider = build_provider(&llm_config)?;

    let settings = SessionSettings::from_env();
    let state = ApplicationState::new(
        &settings.system_prompt,
        settings.working_directory.as_deref(),
        "",
    );
    let store = Arc::new(StateStore::new(state));
    store.dispatch(Action::ChangeProviderSettings {
        provider: provider.name(),
        model: provider.model().to_string(),
    })?;

    if args.is_empty() {
        interactive(store, provider).await
    } else {
        let stdin = read_piped_stdin().await?;
        let Some(prompt) = combine_prompt(&args.join(" "), &stdin) else {
            return Ok(());
        };
        let mut out = std::io::stdout();
        one_shot(provider.as_ref(), &store.get_state(), &prompt, &mut out).await
    }
}

/// Join the argument prompt and piped input: prompt first, newline between.
/// `None` when both are blank.
pub fn combine_prompt(prompt: &str, stdin: &str) -> Option<String> {
    let prompt = prompt.trim();
    let stdin = stdin.trim();
    match (prompt.is_empty(), stdin.is_empty()) {
        (true, true) => None,
        (true, false) => Some(stdin.to_string()),
        (false, true) => Some(prompt.to_string()),
        (false, false) => Some(format!("{prompt}\n{stdin}")),
    }
}

/// Piped stdin, or nothing when attached to a terminal
async fn read_piped_stdin() -> Result<String, CliError> {
    if std::io::stdin().is_terminal() {
        return Ok(String::new());
    }
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .map_err(CliError::Stdin)?;
    Ok(input)
}

/// Single blocking completion, printed to `out`
pub async fn one_shot<W: Write>(
    provider: &dyn Provider,
    state: &ApplicationState,
    prompt: &str,
    out: &mut W,
) -> Result<(), CliError> {
    let mut request = ChatRequest::new(vec![Message::user(prompt)])
        .with_system_prompt(build_system_prompt(state));
    if !state.model.name.is_empty() {
        request = request.with_model(state.model.name.clone());
    }

    let response = provider
        .chat_completion(CancellationToken::new(), &request)
        .await?;
    writeln!(out, "{}", response.content)?;
    Ok(())
}

/// One line of interactive input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Clear,
    Mode(Mode),
    Model(String),
    Quit,
    Empty,
    /// Unknown command or bad argument, with a message for the user
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name {
        "clear" => Command::Clear,
        "quit" | "exit" => Command::Quit,
        "mode" => match arg.parse() {
            Ok(mode) => Command::Mode(mode),
            Err(_) => Command::Invalid(format!("usage: /mode <plan|execute|yolo>, got {arg:?}")),
        },
        "model" if !arg.is_empty() => Command::Model(arg.to_string()),
        "model" => Command::Invalid("usage: /model <name>".to_string()),
        other => Command::Invalid(format!("unknown command: /{other}")),
    }
}

/// Line-mode loop over stdin, streaming replies to stdout
pub async fn interactive(
    store: Arc<StateStore>,
    provider: Arc<dyn Provider>,
) -> Result<(), CliError> {
    let agent = Arc::new(Agent::new(Arc::clone(&store), provider));
    let (input_tx, input_rx) = mpsc::channel(8);
    let AgentHandle { status, task } = agent.start(input_rx)?;
    let printer = tokio::spawn(print_statuses(status));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut quit = false;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.map_err(CliError::Stdin)?,
            _ = tokio::signal::ctrl_c() => {
                if agent.cancel_turn() {
                    continue;
                }
                quit = true;
                break;
            }
        };
        // EOF
        let Some(line) = line else { break };

        let result = match parse_command(&line) {
            Command::Empty => Ok(()),
            Command::Send(text) => {
                if input_tx.send(Message::user(text)).await.is_err() {
                    break;
                }
                Ok(())
            }
            Command::Clear => store.dispatch(Action::ClearHistory),
            Command::Mode(mode) => store.dispatch(Action::ChangeMode(mode)),
            Command::Model(model) => store.dispatch(Action::ChangeProviderSettings {
                provider: store.snapshot().model.provider,
                model,
            }),
            Command::Quit => {
                quit = true;
                break;
            }
            Command::Invalid(message) => {
                eprintln!("{message}");
                Ok(())
            }
        };
        if let Err(e) = result {
            eprintln!("error: {e}");
        }
    }

    // On EOF let queued messages finish; an explicit quit cuts them short
    drop(input_tx);
    if !quit {
        report_join("agent loop", task.await);
    }
    agent.terminate(if quit { "user quit" } else { "input closed" })?;
    report_join("status printer", printer.await);
    Ok(())
}

/// Log a background task that panicked; cancellation is expected on quit.
fn report_join(task: &str, result: Result<(), JoinError>) -> bool {
    match result {
        Err(e) if e.is_panic() => {
            tracing::error!(task, error = %e, "Background task panicked");
            false
        }
        _ => true,
    }
}

async fn print_statuses(mut status: mpsc::UnboundedReceiver<AgentStatus>) {
    let mut printer = StatusPrinter::default();
    while let Some(update) = status.recv().await {
        let text = printer.render(&update);
        if text.is_empty() {
            continue;
        }
        let mut out = std::io::stdout().lock();
        if out.write_all(text.as_bytes()).and_then(|()| out.flush()).is_err() {
            break;
        }
    }
}

/// Turns a sequence of statuses into incremental terminal output
#[derive(Debug, Default)]
pub struct StatusPrinter {
    turn: Option<Uuid>,
    printed: usize,
}

impl StatusPrinter {
    pub fn render(&mut self, status: &AgentStatus) -> String {
        if self.turn != Some(status.turn_id) {
            self.turn = Some(status.turn_id);
            self.printed = 0;
        }

        if let Some(error) = &status.error {
            let sep = if self.printed > 0 { "\n" } else { "" };
            return format!("{sep}error: {error}\n");
        }

        let mut text = String::new();
        if let Some(message) = status.message.as_ref().filter(|m| m.role == Role::Assistant) {
            if let Some(fresh) = message.content.get(self.printed..) {
                text.push_str(fresh);
                self.printed = message.content.len();
            }
        }
        if status.done && status.success {
            text.push('\n');
        }
        text
    }
}
