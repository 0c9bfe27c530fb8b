// ABOUTME: Executor trait and the dispatch/completion plumbing between engine and backends
// ABOUTME: Backends accept an invocation and deliver at most one completion signal

pub mod local;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::engine::error::{ExecutionError, TaskError};
use crate::engine::record::TaskId;
use crate::tasks::TaskFn;

pub use local::LocalExecutor;

/// A fully resolved unit of work handed to an executor.
///
/// Arguments have already had every dependency handle substituted with its
/// value; the executor only needs to run the function.
#[derive(Clone)]
pub struct Invocation {
    pub task_id: TaskId,
    pub task_name: String,
    pub func: Arc<dyn TaskFn>,
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("task_id", &self.task_id)
            .field("task_name", &self.task_name)
            .finish()
    }
}

/// A pluggable execution backend.
///
/// `submit` hands over one invocation and returns a handle whose completion
/// signal delivers the attempt's result. Backends must signal completion at
/// most once per handle; the channel underneath enforces that.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable label used for executor selection at submission.
    fn label(&self) -> &str;

    /// Accept one invocation for asynchronous execution.
    async fn submit(&self, invocation: Invocation) -> Result<ExecutionHandle, ExecutionError>;
}

/// Handle to one in-flight executor invocation.
pub struct ExecutionHandle {
    rx: oneshot::Receiver<Result<Value, TaskError>>,
}

impl ExecutionHandle {
    /// Create a linked completion-sender / handle pair.
    pub fn pair() -> (CompletionSender, ExecutionHandle) {
        let (tx, rx) = oneshot::channel();
        (CompletionSender { tx }, ExecutionHandle { rx })
    }

    /// Wait for the attempt's completion signal.
    ///
    /// If the executor drops its sender without signalling (a crashed worker
    /// task), that is reported as an execution failure rather than hanging.
    pub async fn completion(self, task_name: &str) -> Result<Value, TaskError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskError::ExecutionFailed {
                task: task_name.to_string(),
                message: "executor dropped the completion channel".to_string(),
            }),
        }
    }
}

/// Sending half given to the backend; consumed on use, so a second completion
/// signal for the same invocation cannot be expressed.
pub struct CompletionSender {
    tx: oneshot::Sender<Result<Value, TaskError>>,
}

impl CompletionSender {
    pub fn send(self, outcome: Result<Value, TaskError>) {
        // The receiver may be gone if the engine shut down mid-flight.
        let _ = self.tx.send(outcome);
    }
}
