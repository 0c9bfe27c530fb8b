// ABOUTME: In-process executor running task functions on the blocking thread pool
// ABOUTME: Bounded by a semaphore, with an optional executor-enforced walltime

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ExecutionHandle, Executor, Invocation};
use crate::engine::error::{ExecutionError, TaskError};

/// Executor that runs task functions in this process.
///
/// Functions are synchronous, so each attempt runs on `spawn_blocking`; a
/// semaphore caps how many run at once. A configured walltime is enforced
/// here and surfaced as an ordinary [`TaskError::Timeout`] - timeouts are an
/// executor property, not an engine one.
pub struct LocalExecutor {
    label: String,
    semaphore: Arc<Semaphore>,
    walltime: Option<Duration>,
}

impl LocalExecutor {
    /// Create a local executor with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            label: "local".to_string(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            walltime: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Bound each attempt's run time.
    pub fn with_walltime(mut self, walltime: Duration) -> Self {
        self.walltime = Some(walltime);
        self
    }

    /// Permits currently available, for observability.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn label(&self) -> &str {
        &self.label
    }

    async fn submit(&self, invocation: Invocation) -> Result<ExecutionHandle, ExecutionError> {
        let (tx, handle) = ExecutionHandle::pair();
        let semaphore = Arc::clone(&self.semaphore);
        let walltime = self.walltime;
        let label = self.label.clone();

        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tx.send(Err(TaskError::ExecutionFailed {
                        task: invocation.task_name.clone(),
                        message: format!("executor '{label}' is shutting down"),
                    }));
                    return;
                }
            };

            debug!(
                task_id = %invocation.task_id,
                task = %invocation.task_name,
                executor = %label,
                "starting attempt"
            );

            let task_name = invocation.task_name.clone();
            let run = tokio::task::spawn_blocking(move || {
                invocation
                    .func
                    .call(&invocation.args, &invocation.kwargs)
            });

            let outcome = match walltime {
                Some(limit) => match timeout(limit, run).await {
                    Ok(joined) => flatten_join(joined, &task_name),
                    Err(_) => {
                        warn!(task = %task_name, ?limit, "attempt exceeded walltime");
                        Err(TaskError::Timeout {
                            task: task_name.clone(),
                            walltime: limit,
                        })
                    }
                },
                None => flatten_join(run.await, &task_name),
            };

            drop(permit);
            tx.send(outcome);
        });

        Ok(handle)
    }
}

fn flatten_join(
    joined: Result<Result<serde_json::Value, TaskError>, tokio::task::JoinError>,
    task_name: &str,
) -> Result<serde_json::Value, TaskError> {
    match joined {
        Ok(outcome) => outcome,
        Err(join_error) => Err(TaskError::ExecutionFailed {
            task: task_name.to_string(),
            message: format!("task function panicked: {join_error}"),
        }),
    }
}
