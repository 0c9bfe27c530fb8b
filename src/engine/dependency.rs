// ABOUTME: Dependency resolution over handle-bearing argument structures
// ABOUTME: Extracts embedded result handles, waits for all of them, and substitutes values

use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use super::args::{Argument, MAX_ARG_DEPTH};
use super::error::{SubmitError, TaskError};
use super::handle::ResultHandle;
use super::record::TaskId;

/// Why substitution could not produce resolved arguments.
#[derive(Debug)]
pub(crate) enum SubstituteError {
    /// An upstream dependency resolved to a failure. Carries the
    /// first-encountered failure in left-to-right, depth-first order.
    DependencyFailed { upstream: TaskId, cause: TaskError },
    /// A handle was not yet resolved. The launch coordinator only substitutes
    /// after the wait condition is satisfied, so this indicates an engine bug.
    Unresolved { upstream: TaskId },
}

/// Scan the submitted arguments for embedded result handles.
///
/// Returns the handles in stable left-to-right, depth-first order (positional
/// arguments first, then keyword arguments in insertion order), deduplicated
/// by task id. Refuses structures nested beyond [`MAX_ARG_DEPTH`].
pub(crate) fn extract_handles(
    args: &[Argument],
    kwargs: &IndexMap<String, Argument>,
) -> Result<Vec<ResultHandle>, SubmitError> {
    let mut found: Vec<ResultHandle> = Vec::new();
    for arg in args {
        scan(arg, 1, &mut found)?;
    }
    for arg in kwargs.values() {
        scan(arg, 1, &mut found)?;
    }
    Ok(found)
}

fn scan(
    arg: &Argument,
    depth: usize,
    found: &mut Vec<ResultHandle>,
) -> Result<(), SubmitError> {
    if depth > MAX_ARG_DEPTH {
        return Err(SubmitError::ArgumentDepthExceeded {
            limit: MAX_ARG_DEPTH,
        });
    }
    match arg {
        Argument::Value(_) => {}
        Argument::Future(handle) => {
            if !found.iter().any(|h| h.task_id() == handle.task_id()) {
                found.push(handle.clone());
            }
        }
        Argument::List(items) => {
            for item in items {
                scan(item, depth + 1, found)?;
            }
        }
        Argument::Map(entries) => {
            for item in entries.values() {
                scan(item, depth + 1, found)?;
            }
        }
    }
    Ok(())
}

/// Wait until every dependency handle has resolved, successfully or not.
///
/// This is a wait-for-all condition, never a race: every handle must resolve
/// before this returns, and a handle that is already resolved completes
/// immediately, so the wait is idempotent under any completion interleaving.
pub(crate) async fn wait_all(depends: &[ResultHandle]) {
    let outcomes = join_all(depends.iter().map(|handle| handle.wait())).await;
    for (handle, outcome) in depends.iter().zip(&outcomes) {
        debug!(
            upstream = %handle.task_id(),
            failed = outcome.is_err(),
            "dependency resolved"
        );
    }
}

/// Substitute every embedded handle with its resolved value.
///
/// If any dependency failed, returns the first failure encountered in stable
/// left-to-right, depth-first order and substitutes nothing.
pub(crate) fn substitute(
    args: &[Argument],
    kwargs: &IndexMap<String, Argument>,
) -> Result<(Vec<Value>, IndexMap<String, Value>), SubstituteError> {
    let mut out_args = Vec::with_capacity(args.len());
    for arg in args {
        out_args.push(substitute_one(arg)?);
    }
    let mut out_kwargs = IndexMap::with_capacity(kwargs.len());
    for (key, arg) in kwargs {
        out_kwargs.insert(key.clone(), substitute_one(arg)?);
    }
    Ok((out_args, out_kwargs))
}

fn substitute_one(arg: &Argument) -> Result<Value, SubstituteError> {
    match arg {
        Argument::Value(value) => Ok(value.clone()),
        Argument::Future(handle) => {
            let outcome = handle
                .try_outcome()
                .ok_or(SubstituteError::Unresolved {
                    upstream: handle.task_id(),
                })?;
            match outcome.as_ref() {
                Ok(value) => Ok(value.clone()),
                Err(failure) => Err(SubstituteError::DependencyFailed {
                    upstream: handle.task_id(),
                    cause: failure.cause.clone(),
                }),
            }
        }
        Argument::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(substitute_one(item)?);
            }
            Ok(Value::Array(values))
        }
        Argument::Map(entries) => {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, item) in entries {
                object.insert(key.clone(), substitute_one(item)?);
            }
            Ok(Value::Object(object))
        }
    }
}
