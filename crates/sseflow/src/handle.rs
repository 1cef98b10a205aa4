//! Control handles for a running event source.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{EventSourceError, EventSourceResult};
use crate::session::{SessionSnapshot, SessionState};
use sseflow_transport_traits::{AtomicStreamMetrics, StreamMetrics};

/// Clone-able abort switch shared with a session.
///
/// Aborting is idempotent and permanent.
///
/// ```rust
/// use sseflow::AbortSignal;
///
/// # tokio_test::block_on(async {
/// let signal = AbortSignal::new();
/// let watcher = signal.clone();
///
/// signal.abort();
/// watcher.aborted().await;
/// assert!(watcher.is_aborted());
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    /// Creates a signal that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts the session. Further calls have no effect.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Whether [`abort`](Self::abort) has been called.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal is triggered.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }

    /// A signal aborted together with this one that can also be aborted
    /// on its own.
    pub(crate) fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Handle to an event source running on its own task.
///
/// Dropping the handle detaches the task; call [`abort`](Self::abort) to
/// stop it.
#[derive(Debug)]
pub struct EventSourceHandle {
    pub(crate) abort: AbortSignal,
    pub(crate) snapshot: watch::Receiver<SessionSnapshot>,
    pub(crate) metrics: Arc<AtomicStreamMetrics>,
    pub(crate) task: JoinHandle<EventSourceResult<()>>,
}

impl EventSourceHandle {
    /// Aborts the session: cancels any in-flight request and pending retry.
    ///
    /// A callback that is already running is allowed to finish; no further
    /// callbacks start afterwards.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Whether the session has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// A clone-able signal that aborts this session only.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// Current state, retry count and last event id.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Counters collected so far.
    pub fn metrics(&self) -> StreamMetrics {
        self.metrics.snapshot()
    }

    /// Whether the driver task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the session to end.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError::Open`] if `on_open` rejected a response,
    /// or [`EventSourceError::Internal`] if the driver task panicked.
    pub async fn join(self) -> EventSourceResult<()> {
        self.task
            .await
            .map_err(|e| EventSourceError::Internal(format!("Event source task failed: {e}")))?
    }
}
