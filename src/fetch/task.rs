//! Per-key download task state machine.
//!
//! A [`DownloadTask`] owns one in-flight fetch for one key/URL pair. It is
//! driven by [`TransportEvent`]s arriving on a spawned driver task, buffers
//! body bytes, and classifies the terminal outcome. Subscribers register
//! one-shot completion callbacks; when the task reaches a terminal state
//! every callback registered before that point fires exactly once, each on
//! its own spawned task so a slow subscriber cannot delay the others.
//!
//! State machine: `Idle → Executing → {Succeeded, Failed, Cancelled}`.
//! All transitions happen inside a single mutex-guarded critical section
//! per task, because transport callbacks and cancellation can race. The
//! lock is never held across an await point.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use tokio::task::AbortHandle;
use tracing::{debug, instrument};

use super::error::FetchError;
use super::transport::{Transport, TransportEvent};
use crate::asset::{ShieldAsset, ShieldKey};

/// One-shot completion callback registered by a subscriber.
pub type Completion = Box<dyn FnOnce(Result<ShieldAsset, FetchError>) + Send + 'static>;

/// Bookkeeping hook the coordinator installs before starting a task.
///
/// Runs synchronously inside the terminal transition, before any
/// subscriber callback is dispatched, so the cache write and registry
/// removal are ordered ahead of everything subscribers can observe.
pub(crate) type TerminalHook = Box<dyn FnOnce(&Result<ShieldAsset, FetchError>) + Send + 'static>;

/// Externally observable lifecycle phase of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Idle,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskPhase {
    /// Returns whether this phase is terminal (no further transitions).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Internal lifecycle state; terminal states store their outcome so late
/// `add_completion` calls can be answered.
enum TaskState {
    Idle,
    Executing,
    Succeeded(ShieldAsset),
    Failed(FetchError),
    Cancelled,
}

impl TaskState {
    fn phase(&self) -> TaskPhase {
        match self {
            Self::Idle => TaskPhase::Idle,
            Self::Executing => TaskPhase::Executing,
            Self::Succeeded(_) => TaskPhase::Succeeded,
            Self::Failed(_) => TaskPhase::Failed,
            Self::Cancelled => TaskPhase::Cancelled,
        }
    }

    fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }
}

/// State behind the task's single critical section.
struct TaskInner {
    state: TaskState,
    buffer: BytesMut,
    waiters: Vec<Completion>,
    terminal_hook: Option<TerminalHook>,
    driver: Option<AbortHandle>,
}

/// The in-flight state machine for one key's fetch.
///
/// Created by the coordinator (or directly in tests), started once, and
/// destroyed when the coordinator drops it from the registry after the
/// terminal transition.
pub struct DownloadTask {
    key: ShieldKey,
    url: String,
    inner: Mutex<TaskInner>,
}

impl DownloadTask {
    /// Creates an idle task for `key` fetching `url`.
    #[must_use]
    pub fn new(key: ShieldKey, url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            key,
            url: url.into(),
            inner: Mutex::new(TaskInner {
                state: TaskState::Idle,
                buffer: BytesMut::new(),
                waiters: Vec::new(),
                terminal_hook: None,
                driver: None,
            }),
        })
    }

    /// Returns the task's key.
    #[must_use]
    pub fn key(&self) -> &ShieldKey {
        &self.key
    }

    /// Returns the task's target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> TaskPhase {
        self.lock_inner().state.phase()
    }

    /// Installs the coordinator's bookkeeping hook.
    ///
    /// Must be installed before `start`; a hook set after the terminal
    /// transition never runs.
    pub(crate) fn set_terminal_hook(
        &self,
        hook: impl FnOnce(&Result<ShieldAsset, FetchError>) + Send + 'static,
    ) {
        self.lock_inner().terminal_hook = Some(Box::new(hook));
    }

    /// Starts the fetch: transitions `Idle → Executing` and spawns the
    /// driver loop over the transport's event stream.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::AlreadyStarted`] if the task has left the
    /// idle state, whether by an earlier `start` or by cancellation.
    pub fn start(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<(), FetchError> {
        {
            let mut inner = self.lock_inner();
            match inner.state {
                TaskState::Idle => inner.state = TaskState::Executing,
                _ => return Err(FetchError::already_started(self.key.as_str())),
            }
        }
        debug!(key = %self.key, url = %self.url, "starting download task");

        let task = Arc::clone(self);
        let driver = tokio::spawn(async move { task.drive(transport).await });
        let abort = driver.abort_handle();

        let mut inner = self.lock_inner();
        if inner.state.is_terminal() {
            // cancelled in the window before the driver handle was stored
            drop(inner);
            abort.abort();
        } else {
            inner.driver = Some(abort);
        }
        Ok(())
    }

    /// Registers a completion callback.
    ///
    /// Valid in any state. If the task is already terminal the callback is
    /// dispatched immediately (still asynchronously, off the caller's
    /// stack) with the stored outcome; it is never silently dropped.
    pub fn add_completion(
        &self,
        callback: impl FnOnce(Result<ShieldAsset, FetchError>) + Send + 'static,
    ) {
        let callback: Completion = Box::new(callback);
        let ready = {
            let mut inner = self.lock_inner();
            match &inner.state {
                TaskState::Idle | TaskState::Executing => {
                    inner.waiters.push(callback);
                    None
                }
                TaskState::Succeeded(asset) => Some((callback, Ok(asset.clone()))),
                TaskState::Failed(error) => Some((callback, Err(error.clone()))),
                TaskState::Cancelled => Some((callback, Err(FetchError::cancelled(&self.url)))),
            }
        };
        if let Some((callback, outcome)) = ready {
            debug!(key = %self.key, "late subscriber on terminal task, dispatching stored outcome");
            tokio::spawn(async move { callback(outcome) });
        }
    }

    /// Cancels the fetch.
    ///
    /// Valid from `Idle` or `Executing`: aborts the driver (which drops
    /// the transport's event receiver, stopping the request best-effort),
    /// discards buffered bytes, and transitions to `Cancelled`. Idempotent
    /// once terminal.
    ///
    /// Subscribers registered before cancellation receive
    /// [`FetchError::Cancelled`] rather than nothing, keeping the
    /// exactly-once completion contract.
    #[instrument(level = "debug", skip(self), fields(key = %self.key))]
    pub fn cancel(&self) {
        let driver = {
            let mut inner = self.lock_inner();
            if inner.state.is_terminal() {
                return;
            }
            inner.driver.take()
        };
        if let Some(abort) = driver {
            abort.abort();
        }
        self.transition_terminal(TaskState::Cancelled);
    }

    /// Consumes the transport's event stream until a terminal transition.
    async fn drive(self: Arc<Self>, transport: Arc<dyn Transport>) {
        let mut events = transport.issue(&self.url).await;
        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                return;
            }
        }
        // Producer went away without a Completed event; classify as a
        // transport failure unless something else already terminated us.
        self.transition_terminal(TaskState::Failed(FetchError::client_error(
            &self.url,
            "transport event stream ended unexpectedly",
        )));
    }

    /// Applies one transport event; returns whether to keep driving.
    fn handle_event(&self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::ResponseStarted { status } => {
                if status >= 400 {
                    // Error status terminates immediately; any body that
                    // follows is discarded by the stopped driver.
                    self.transition_terminal(TaskState::Failed(FetchError::server_error(
                        &self.url, status,
                    )));
                    return false;
                }
                let mut inner = self.lock_inner();
                if matches!(inner.state, TaskState::Executing) {
                    inner.buffer.clear();
                    true
                } else {
                    false
                }
            }
            TransportEvent::DataReceived(chunk) => {
                let mut inner = self.lock_inner();
                if matches!(inner.state, TaskState::Executing) {
                    inner.buffer.extend_from_slice(&chunk);
                    true
                } else {
                    false
                }
            }
            TransportEvent::Completed { error: Some(message) } => {
                self.transition_terminal(TaskState::Failed(FetchError::client_error(
                    &self.url, message,
                )));
                false
            }
            TransportEvent::Completed { error: None } => {
                let body = {
                    let mut inner = self.lock_inner();
                    if !matches!(inner.state, TaskState::Executing) {
                        return false;
                    }
                    mem::take(&mut inner.buffer).freeze()
                };
                let next = match ShieldAsset::decode(&self.url, body) {
                    Ok(asset) => TaskState::Succeeded(asset),
                    Err(error) => TaskState::Failed(error),
                };
                self.transition_terminal(next);
                false
            }
        }
    }

    /// The single terminal transition: stores the outcome, runs the
    /// coordinator hook, then fans out to all registered subscribers.
    ///
    /// No-op when the task is already terminal, which makes racing
    /// terminal causes (completion vs cancellation) safe: whichever gets
    /// the lock first wins and the loser does nothing.
    fn transition_terminal(&self, next: TaskState) {
        let outcome = match &next {
            TaskState::Succeeded(asset) => Ok(asset.clone()),
            TaskState::Failed(error) => Err(error.clone()),
            TaskState::Cancelled => Err(FetchError::cancelled(&self.url)),
            TaskState::Idle | TaskState::Executing => {
                debug_assert!(false, "terminal transition with non-terminal state");
                return;
            }
        };

        let (waiters, hook) = {
            let mut inner = self.lock_inner();
            if inner.state.is_terminal() {
                return;
            }
            inner.buffer = BytesMut::new();
            inner.driver = None;
            inner.state = next;
            (mem::take(&mut inner.waiters), inner.terminal_hook.take())
        };

        match &outcome {
            Ok(asset) => debug!(
                key = %self.key,
                bytes = asset.byte_len(),
                subscribers = waiters.len(),
                "download task succeeded"
            ),
            Err(error) => debug!(
                key = %self.key,
                %error,
                subscribers = waiters.len(),
                "download task finished with error"
            ),
        }

        if let Some(hook) = hook {
            hook(&outcome);
        }
        for waiter in waiters {
            let outcome = outcome.clone();
            tokio::spawn(async move { waiter(outcome) });
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
