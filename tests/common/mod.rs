// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides test executors and task functions with observable behavior

#![allow(dead_code)]

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use flowline::engine::{ChannelError, ExecutionError, TaskError};
use flowline::executors::{CompletionSender, ExecutionHandle, Executor, Invocation};
use flowline::tasks::{task_fn, TaskFn};

/// Install a test subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Runs invocations inline and counts how many it accepted.
///
/// The count distinguishes a real launch from a memo hit or a
/// dependency-failed short-circuit, neither of which reaches the executor.
pub struct CountingExecutor {
    label: String,
    submissions: AtomicUsize,
}

impl CountingExecutor {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            submissions: AtomicUsize::new(0),
        }
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn run(invocation: Invocation, tx: CompletionSender) {
        tokio::task::spawn_blocking(move || {
            let outcome = invocation.func.call(&invocation.args, &invocation.kwargs);
            tx.send(outcome);
        });
    }
}

#[async_trait]
impl Executor for CountingExecutor {
    fn label(&self) -> &str {
        &self.label
    }

    async fn submit(&self, invocation: Invocation) -> Result<ExecutionHandle, ExecutionError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let (tx, handle) = ExecutionHandle::pair();
        Self::run(invocation, tx);
        Ok(handle)
    }
}

/// Fails the first `fail_first` submissions with a channel fault, then
/// behaves like [`CountingExecutor`].
pub struct FlakyChannelExecutor {
    label: String,
    fail_first: u32,
    submissions: AtomicU32,
}

impl FlakyChannelExecutor {
    pub fn new(label: &str, fail_first: u32) -> Self {
        Self {
            label: label.to_string(),
            fail_first,
            submissions: AtomicU32::new(0),
        }
    }

    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for FlakyChannelExecutor {
    fn label(&self) -> &str {
        &self.label
    }

    async fn submit(&self, invocation: Invocation) -> Result<ExecutionHandle, ExecutionError> {
        let attempt = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, handle) = ExecutionHandle::pair();
        if attempt <= self.fail_first {
            tx.send(Err(TaskError::Channel(ChannelError::SessionFailed {
                hostname: "worker-1".to_string(),
                cause: "connection reset".to_string(),
            })));
        } else {
            CountingExecutor::run(invocation, tx);
        }
        Ok(handle)
    }
}

/// A task function returning its single numeric argument doubled.
pub fn double_fn() -> Arc<dyn TaskFn> {
    task_fn("double", |args: &[Value], _kwargs: &IndexMap<String, Value>| {
        let n = args
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| TaskError::ExecutionFailed {
                task: "double".to_string(),
                message: "expected one integer argument".to_string(),
            })?;
        Ok(json!(n * 2))
    })
}

/// A task function that fails its first `fail_times` calls, then succeeds.
pub fn flaky_fn(name: &str, fail_times: u32) -> Arc<dyn TaskFn> {
    let owned = name.to_string();
    let calls = AtomicU32::new(0);
    task_fn(name, move |_args, _kwargs| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= fail_times {
            Err(TaskError::ExecutionFailed {
                task: owned.clone(),
                message: format!("transient failure on call {call}"),
            })
        } else {
            Ok(json!("recovered"))
        }
    })
}

/// A task function that always fails.
pub fn failing_fn(name: &str) -> Arc<dyn TaskFn> {
    let owned = name.to_string();
    task_fn(name, move |_args, _kwargs| {
        Err(TaskError::ExecutionFailed {
            task: owned.clone(),
            message: "deliberate failure".to_string(),
        })
    })
}

/// A task function counting its invocations, returning the fixed value.
pub fn counting_fn(name: &str, value: Value, calls: Arc<AtomicU32>) -> Arc<dyn TaskFn> {
    task_fn(name, move |_args, _kwargs| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value.clone())
    })
}
