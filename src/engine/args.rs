// ABOUTME: Typed argument shapes for task submission
// ABOUTME: A closed set of container forms that may embed other tasks' result handles

use indexmap::IndexMap;
use serde_json::Value;

use super::handle::ResultHandle;

/// Maximum nesting depth of argument containers.
///
/// Extraction and substitution both refuse deeper structures so recursion is
/// guaranteed to terminate.
pub const MAX_ARG_DEPTH: usize = 8;

/// One submitted argument: a plain value, a dependency on another task's
/// result, or a container of further arguments.
#[derive(Debug, Clone)]
pub enum Argument {
    /// A concrete value, passed through unchanged.
    Value(Value),
    /// Another task's result handle; substituted with its value at launch.
    Future(ResultHandle),
    /// Ordered sequence of arguments.
    List(Vec<Argument>),
    /// Keyed mapping of arguments, insertion order preserved.
    Map(IndexMap<String, Argument>),
}

impl Argument {
    /// Depth of the deepest nesting in this argument (a scalar is depth 1).
    pub fn depth(&self) -> usize {
        match self {
            Argument::Value(_) | Argument::Future(_) => 1,
            Argument::List(items) => 1 + items.iter().map(Argument::depth).max().unwrap_or(0),
            Argument::Map(entries) => {
                1 + entries.values().map(Argument::depth).max().unwrap_or(0)
            }
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Value(value)
    }
}

impl From<ResultHandle> for Argument {
    fn from(handle: ResultHandle) -> Self {
        Argument::Future(handle)
    }
}

impl From<&ResultHandle> for Argument {
    fn from(handle: &ResultHandle) -> Self {
        Argument::Future(handle.clone())
    }
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Argument::Value(Value::String(s.to_string()))
    }
}

impl From<String> for Argument {
    fn from(s: String) -> Self {
        Argument::Value(Value::String(s))
    }
}

impl From<i64> for Argument {
    fn from(n: i64) -> Self {
        Argument::Value(Value::from(n))
    }
}

impl From<bool> for Argument {
    fn from(b: bool) -> Self {
        Argument::Value(Value::Bool(b))
    }
}

impl From<Vec<Argument>> for Argument {
    fn from(items: Vec<Argument>) -> Self {
        Argument::List(items)
    }
}
