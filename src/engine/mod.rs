// ABOUTME: Dataflow engine module - task lifecycle, dependency resolution, and launch coordination
// ABOUTME: Exports the engine, its records and handles, and the error taxonomy

pub mod args;
pub mod checkpoint;
pub mod dataflow;
pub mod dependency;
pub mod error;
pub mod handle;
pub mod memo;
pub mod record;
pub mod registry;
pub mod retry;

pub use args::{Argument, MAX_ARG_DEPTH};
pub use checkpoint::{CheckpointEntry, CheckpointStore, FileCheckpointStore};
pub use dataflow::{DataflowBuilder, DataflowEngine, SubmitOptions};
pub use error::{
    ChannelError, CheckpointError, ExecutionError, SubmitError, TaskError, TaskFailure,
};
pub use handle::{ResultHandle, TaskOutcome};
pub use memo::{hash_invocation, Memoizer};
pub use record::{TaskId, TaskRecord, TaskStatus};
pub use registry::TaskRegistry;
pub use retry::RetryPolicy;
