// ABOUTME: Task function trait - the unit of work the engine dispatches to executors
// ABOUTME: Provides a closure adapter plus the shell command task implementation

pub mod shell;

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use crate::engine::error::TaskError;

pub use shell::{CommandTemplate, ShellTask, TemplateFault};

/// A unit of work: a named, synchronous function over fully resolved values.
///
/// The name is the callable identity used for memoization, so two logically
/// different functions must not share a name.
pub trait TaskFn: Send + Sync + 'static {
    /// Stable identity of this function.
    fn name(&self) -> &str;

    /// Run one attempt with resolved positional and keyword arguments.
    fn call(&self, args: &[Value], kwargs: &IndexMap<String, Value>)
        -> Result<Value, TaskError>;
}

struct ClosureTask<F> {
    name: String,
    func: F,
}

impl<F> TaskFn for ClosureTask<F>
where
    F: Fn(&[Value], &IndexMap<String, Value>) -> Result<Value, TaskError>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(
        &self,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> Result<Value, TaskError> {
        (self.func)(args, kwargs)
    }
}

/// Wrap a closure as a named task function.
pub fn task_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn TaskFn>
where
    F: Fn(&[Value], &IndexMap<String, Value>) -> Result<Value, TaskError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(ClosureTask {
        name: name.into(),
        func,
    })
}
