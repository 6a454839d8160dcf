//! In-memory state store
//!
//! Single writer, many readers. `dispatch` applies one action at a time under
//! a mutex; readers get copies. Observers are notified after the lock is
//! released, each on its own task.
//!
//! Notification is best-effort and fire-and-forget: handlers run
//! concurrently, bounded by `MAX_CONCURRENT_NOTIFICATIONS`, with no ordering
//! across dispatches. Do not treat them as an audit log.

use super::action::{Action, ActionError};
use super::types::ApplicationState;
use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::Semaphore;

const MAX_CONCURRENT_NOTIFICATIONS: usize = 32;

/// What observers receive after a successful dispatch
#[derive(Debug, Clone)]
pub struct StateChange {
    pub action: Arc<Action>,
    pub old: Arc<ApplicationState>,
    pub new: Arc<ApplicationState>,
}

/// Observer callback. Runs on a runtime worker, so keep it short.
pub type StateChangeHandler = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Debug, Error)]
#[error("failed to execute action {action}: {source}")]
pub struct DispatchError {
    pub action: &'static str,
    #[source]
    pub source: ActionError,
}

pub struct StateStore {
    state: Mutex<Arc<ApplicationState>>,
    listeners: RwLock<Vec<StateChangeHandler>>,
    notify_permits: Arc<Semaphore>,
}

impl StateStore {
    pub fn new(initial: ApplicationState) -> Self {
        Self {
            state: Mutex::new(Arc::new(initial)),
            listeners: RwLock::new(Vec::new()),
            notify_permits: Arc::new(Semaphore::new(MAX_CONCURRENT_NOTIFICATIONS)),
        }
    }

    /// Owned copy of the current state
    pub fn get_state(&self) -> ApplicationState {
        self.snapshot().as_ref().clone()
    }

    /// Shared, read-only view of the current state
    pub fn snapshot(&self) -> Arc<ApplicationState> {
        let current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Register an observer for every future successful dispatch
    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Apply `action` to the current state.
    ///
    /// On failure the current state is left untouched, no observer runs, and
    /// the error is returned to the caller.
    pub fn dispatch(&self, action: Action) -> Result<(), DispatchError> {
        let change = {
            let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);

            let mut next = action.execute(&current).map_err(|source| {
                tracing::warn!(action = action.name(), error = %source, "Action rejected");
                DispatchError {
                    action: action.name(),
                    source,
                }
            })?;
            next.context.updated = Utc::now();

            let next = Arc::new(next);
            let old = std::mem::replace(&mut *current, Arc::clone(&next));
            StateChange {
                action: Arc::new(action),
                old,
                new: next,
            }
        };

        tracing::debug!(
            action = change.action.name(),
            messages = change.new.context.messages.len(),
            busy = change.new.model.busy,
            "State updated"
        );

        self.notify(&change);
        Ok(())
    }

    fn notify(&self, change: &StateChange) {
        let listeners: Vec<StateChangeHandler> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if listeners.is_empty() {
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            for listener in listeners {
                let change = change.clone();
                let permits = Arc::clone(&self.notify_permits);
                handle.spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    listener(&change);
                });
            }
        } else {
            // Outside a runtime there is nowhere to spawn; deliver in place
            for listener in listeners {
                let delivered = panic::catch_unwind(AssertUnwindSafe(|| listener(change)));
                if delivered.is_err() {
                    tracing::error!(action = change.action.name(), "State listener panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("StateStore")
            .field("state", &self.snapshot())
            .field("listeners", &listeners)
            .finish_non_exhaustive()
    }
}
