//! Conversation orchestrator
//!
//! Consumes inbound messages, drives each one through a streamed turn
//! against the provider, and records every step in the state store.

mod turn;

#[cfg(test)]
pub(crate) mod testing;


use crate::llm::Provider;
use crate::state::{Action, DispatchError, Message, StateStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent already started")]
    AlreadyStarted,

    #[error("agent requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Progress report for one turn, sent to the downstream consumer
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStatus {
    pub turn_id: Uuid,
    pub success: bool,
    /// Inbound message right after the start, then the accumulated reply
    pub message: Option<Message>,
    pub error: Option<String>,
    /// Last status of the turn
    pub done: bool,
}

impl AgentStatus {
    fn progress(turn_id: Uuid, message: Option<Message>) -> Self {
        Self {
            turn_id,
            success: true,
            message,
            error: None,
            done: false,
        }
    }

    fn finished(turn_id: Uuid, message: Option<Message>) -> Self {
        Self {
            done: true,
            ..Self::progress(turn_id, message)
        }
    }

    fn failed(turn_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            turn_id,
            success: false,
            message: None,
            error: Some(error.into()),
            done: true,
        }
    }
}

/// Outbound status channel. Closing it drops the only sender, so the
/// consumer sees end-of-channel once it drains what was already sent.
#[derive(Clone, Default)]
struct StatusSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<AgentStatus>>>>,
}

impl StatusSink {
    fn install(&self, tx: mpsc::UnboundedSender<AgentStatus>) {
        *self.tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn send(&self, status: AgentStatus) -> bool {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(status).is_ok(),
            None => false,
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Handle returned by [`Agent::start`]
pub struct AgentHandle {
    pub status: mpsc::UnboundedReceiver<AgentStatus>,
    pub task: JoinHandle<()>,
}

pub struct Agent {
    store: Arc<StateStore>,
    provider: Arc<dyn Provider>,
    sink: StatusSink,
    /// Root token; every turn runs under a child of it
    shutdown: CancellationToken,
    current_turn: Mutex<Option<CancellationToken>>,
    started: AtomicBool,
}

impl Agent {
    /// Create an agent bound to `store`. A `Terminate` dispatched by anyone
    /// closes the status channel and stops the message loop.
    pub fn new(store: Arc<StateStore>, provider: Arc<dyn Provider>) -> Self {
        let sink = StatusSink::default();
        let shutdown = CancellationToken::new();

        let listener_sink = sink.clone();
        let listener_shutdown = shutdown.clone();
        store.on_state_change(move |change| {
            if let Action::Terminate { reason } = change.action.as_ref() {
                tracing::info!(reason = %reason, "Terminate received, closing agent output");
                listener_sink.close();
                listener_shutdown.cancel();
            }
        });

        Self {
            store,
            provider,
            sink,
            shutdown,
            current_turn: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Spawn the message loop. Can only be done once.
    pub fn start(self: &Arc<Self>, input: mpsc::Receiver<Message>) -> Result<AgentHandle, AgentError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AgentError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.sink.install(tx);

        let agent = Arc::clone(self);
        let task = runtime.spawn(agent.run(input));
        Ok(AgentHandle { status: rx, task })
    }

    async fn run(self: Arc<Self>, mut input: mpsc::Receiver<Message>) {
        let session_id = self.store.snapshot().context.session_id.clone();
        tracing::info!(session_id = %session_id, provider = %self.provider.name(), "Starting agent");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                message = input.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
            }
        }

        tracing::info!(session_id = %session_id, "Agent stopped");
    }

    async fn handle_message(&self, message: Message) {
        let cancel = self.shutdown.child_token();
        *self.lock_turn() = Some(cancel.clone());

        self.run_turn(message, cancel).await;

        self.lock_turn().take();
    }

    /// Cancel the in-flight turn, if any. Returns whether one was running.
    pub fn cancel_turn(&self) -> bool {
        match self.lock_turn().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Dispatch `Terminate`, close the status channel and stop the loop.
    pub fn terminate(&self, reason: impl Into<String>) -> Result<(), DispatchError> {
        let result = self.store.dispatch(Action::Terminate {
            reason: reason.into(),
        });
        self.sink.close();
        self.shutdown.cancel();
        result
    }

    fn lock_turn(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.current_turn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
