// ABOUTME: Main library module for the flowline dataflow engine
// ABOUTME: Exports all core modules and provides the public API

pub mod engine;
pub mod executors;
pub mod tasks;

// Re-export commonly used types
pub use engine::{
    Argument, DataflowBuilder, DataflowEngine, FileCheckpointStore, ResultHandle, RetryPolicy,
    SubmitError, SubmitOptions, TaskError, TaskFailure, TaskId, TaskStatus,
};
pub use executors::{Executor, LocalExecutor};
pub use tasks::{task_fn, ShellTask, TaskFn};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
