// ABOUTME: Error types for the dataflow engine and its collaborators
// ABOUTME: Defines per-attempt task faults, terminal failures, and submission errors

use std::time::Duration;
use thiserror::Error;

use super::record::TaskId;

/// A single execution attempt's failure cause.
///
/// These are the faults an executor (or the task function it runs) can report
/// for one attempt. Terminal outcomes wrap them in [`TaskFailure`] together
/// with the full per-attempt history.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// Composing the unit of work from its arguments raised before anything ran.
    #[error("formatting failed for task '{task}': {message}")]
    BadFormatting { task: String, message: String },

    /// The task function was expected to produce a runnable unit of work and produced none.
    #[error("task '{task}' did not produce a command to run")]
    NoResult { task: String },

    /// The executor enforced a time bound and the work did not finish within it.
    #[error("task '{task}' exceeded walltime of {walltime:?}")]
    Timeout { task: String, walltime: Duration },

    /// The underlying invocation ran and exited non-zero.
    #[error("task '{task}' exited with code {code}")]
    NonZeroExit { task: String, code: i32 },

    /// The task function raised while executing.
    #[error("task '{task}' failed during execution: {message}")]
    ExecutionFailed { task: String, message: String },

    /// Declared output artifacts were absent after an otherwise successful run.
    #[error("task '{task}' is missing declared outputs: {missing:?}")]
    MissingOutputs { task: String, missing: Vec<String> },

    /// Inherited from an upstream task this task depends on.
    #[error("task depends on failed task {upstream}: {cause}")]
    DependencyFailed {
        upstream: TaskId,
        cause: Box<TaskError>,
    },

    /// A remote-channel fault below the executor boundary, reported opaquely.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl TaskError {
    /// Whether this fault was inherited from a dependency rather than produced
    /// by the task's own execution. Inherited faults never consume a retry.
    pub fn is_inherited(&self) -> bool {
        matches!(self, TaskError::DependencyFailed { .. })
    }
}

/// Failures surfaced by the remote channel layer, one subkind per cause.
///
/// The engine treats all of these as opaque executor-failure causes; it never
/// interprets them beyond attaching them to the task's failure outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("host key verification failed for {hostname}: {cause}")]
    BadHostKey { hostname: String, cause: String },

    #[error("remote working directory is inaccessible on {hostname}: {cause}")]
    BadWorkdir { hostname: String, cause: String },

    #[error("insufficient permissions on remote working directory on {hostname}: {cause}")]
    BadWorkdirPermissions { hostname: String, cause: String },

    #[error("authentication to {hostname} failed: {cause}")]
    AuthFailed { hostname: String, cause: String },

    #[error("could not establish a session with {hostname}: {cause}")]
    SessionFailed { hostname: String, cause: String },
}

impl ChannelError {
    /// The originating host identifier.
    pub fn hostname(&self) -> &str {
        match self {
            ChannelError::BadHostKey { hostname, .. }
            | ChannelError::BadWorkdir { hostname, .. }
            | ChannelError::BadWorkdirPermissions { hostname, .. }
            | ChannelError::AuthFailed { hostname, .. }
            | ChannelError::SessionFailed { hostname, .. } => hostname,
        }
    }
}

/// Terminal failure outcome carried by a resolved [`ResultHandle`].
///
/// `history` holds every attempt's fault in order; `cause` is the fault that
/// made the task terminal (the last entry for exhausted retries, the inherited
/// fault for dependency failures).
///
/// [`ResultHandle`]: super::handle::ResultHandle
#[derive(Error, Debug, Clone)]
#[error("task {task_id} failed: {cause}")]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub cause: TaskError,
    pub history: Vec<TaskError>,
}

impl TaskFailure {
    /// Whether the task failed because of an upstream dependency.
    pub fn is_dependency_failure(&self) -> bool {
        self.cause.is_inherited()
    }
}

/// Faults reported synchronously at submission time, never via the handle.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("no registered executor matches candidates {candidates:?}")]
    UnknownExecutor { candidates: Vec<String> },

    #[error("argument nesting exceeds the depth bound of {limit}")]
    ArgumentDepthExceeded { limit: usize },

    #[error("engine has been shut down")]
    EngineShutdown,
}

/// Faults raised by an executor while accepting a dispatch.
///
/// Completion-side faults travel through the completion signal as
/// [`TaskError`]; these cover the dispatch call itself.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("executor '{label}' could not accept the task: {message}")]
    DispatchFailed { label: String, message: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("executor '{label}' is shut down")]
    ExecutorShutdown { label: String },
}

impl ExecutionError {
    /// Collapse a dispatch fault into the per-attempt fault vocabulary so the
    /// retry policy can treat it like any other execution failure.
    pub fn into_task_error(self, task: &str) -> TaskError {
        match self {
            ExecutionError::Channel(e) => TaskError::Channel(e),
            other => TaskError::ExecutionFailed {
                task: task.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Faults from the persisted checkpoint store.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed checkpoint entry at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
