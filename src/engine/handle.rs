// ABOUTME: Single-assignment asynchronous result handle returned to submitters
// ABOUTME: Resolves exactly once to a value or failure and wakes all waiters

use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::error;

use super::error::TaskFailure;
use super::record::TaskId;
use serde_json::Value;

/// The eventual outcome of one task: a value or a terminal failure.
pub type TaskOutcome = Result<Value, TaskFailure>;

/// Asynchronous single-assignment container for one task's outcome.
///
/// Handles are cheap to clone; every clone observes the same resolution.
/// Readers may block on [`wait`], poll with [`try_outcome`], or embed the
/// handle in another task's arguments, in which case the engine waits on it
/// as a dependency. Resolution happens exactly once; redundant attempts are
/// rejected and the first outcome is preserved.
///
/// [`wait`]: ResultHandle::wait
/// [`try_outcome`]: ResultHandle::try_outcome
#[derive(Clone)]
pub struct ResultHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    task_id: TaskId,
    outcome: OnceLock<Arc<TaskOutcome>>,
    // Wakeup channel. The sender lives here so waiters can always subscribe;
    // the flag flips to true strictly after `outcome` is written.
    resolved_tx: watch::Sender<bool>,
}

impl ResultHandle {
    pub(crate) fn new(task_id: TaskId) -> Self {
        let (resolved_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                task_id,
                outcome: OnceLock::new(),
                resolved_tx,
            }),
        }
    }

    /// Id of the task this handle belongs to.
    pub fn task_id(&self) -> TaskId {
        self.inner.task_id
    }

    /// Whether the handle has been resolved to a value or failure.
    pub fn is_resolved(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// The outcome, if already resolved.
    pub fn try_outcome(&self) -> Option<Arc<TaskOutcome>> {
        self.inner.outcome.get().cloned()
    }

    /// Wait until the handle is resolved and return the outcome.
    ///
    /// Suspends only the calling task; no engine lock is held while waiting.
    pub async fn wait(&self) -> Arc<TaskOutcome> {
        // Subscribe before checking so a resolution racing with this call is
        // never missed: the flag is flipped after the outcome is stored.
        let mut rx = self.inner.resolved_tx.subscribe();
        if let Some(outcome) = self.inner.outcome.get() {
            return outcome.clone();
        }
        // The sender is owned by `inner`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|resolved| *resolved).await;
        self.inner
            .outcome
            .get()
            .expect("resolved flag set before outcome")
            .clone()
    }

    /// Resolve the handle. Returns false (and leaves the first outcome in
    /// place) if it was already resolved; a second resolution attempt is a
    /// programming error in the engine, not a recoverable condition.
    pub(crate) fn resolve(&self, outcome: TaskOutcome) -> bool {
        let fresh = self.inner.outcome.set(Arc::new(outcome)).is_ok();
        if fresh {
            let _ = self.inner.resolved_tx.send(true);
        } else {
            error!(
                task_id = %self.inner.task_id,
                "attempted to resolve an already-resolved handle"
            );
        }
        fresh
    }
}

impl std::fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("task_id", &self.inner.task_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
