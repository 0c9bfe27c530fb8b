// ABOUTME: Integration tests for the dataflow engine
// ABOUTME: Tests dependency resolution, retries, memoization, and failure propagation

use indexmap::IndexMap;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use flowline::engine::{
    Argument, DataflowEngine, RetryPolicy, SubmitOptions, TaskError, TaskStatus,
};
use flowline::executors::LocalExecutor;
use flowline::tasks::{task_fn, ShellTask};

mod common;
use common::{
    counting_fn, double_fn, failing_fn, flaky_fn, CountingExecutor, FlakyChannelExecutor,
};

async fn engine_with(executor: Arc<CountingExecutor>) -> DataflowEngine {
    common::init_tracing();
    DataflowEngine::builder()
        .executor(executor)
        .start()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_simple_task_completes() {
    let engine = engine_with(Arc::new(CountingExecutor::new("local"))).await;

    let handle = engine
        .submit(
            double_fn(),
            vec![Argument::from(21)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = handle.wait().await;
    assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!(42));
    assert_eq!(engine.task_status(handle.task_id()), Some(TaskStatus::Done));
}

#[tokio::test]
async fn test_dependency_chain_substitutes_values() {
    let engine = engine_with(Arc::new(CountingExecutor::new("local"))).await;

    let first = engine
        .submit(
            double_fn(),
            vec![Argument::from(3)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();
    let second = engine
        .submit(
            double_fn(),
            vec![Argument::from(&first)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = second.wait().await;
    assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!(12));
}

#[tokio::test]
async fn test_fan_out_shares_one_upstream_result() {
    let engine = engine_with(Arc::new(CountingExecutor::new("local"))).await;

    let upstream = engine
        .submit(
            double_fn(),
            vec![Argument::from(5)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let mut downstream = Vec::new();
    for _ in 0..4 {
        let handle = engine
            .submit(
                double_fn(),
                vec![Argument::from(&upstream)],
                IndexMap::new(),
                SubmitOptions::default(),
            )
            .unwrap();
        downstream.push(handle);
    }

    for handle in downstream {
        let outcome = handle.wait().await;
        assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!(20));
    }
}

#[tokio::test]
async fn test_nested_argument_handles_are_substituted() {
    let engine = engine_with(Arc::new(CountingExecutor::new("local"))).await;

    let upstream = engine
        .submit(
            task_fn("seven", |_a, _k| Ok(json!(7))),
            Vec::new(),
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    // The handle is buried inside a list argument.
    let sum = engine
        .submit(
            task_fn("sum_list", |args, _k| {
                let total: i64 = args[0]
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter_map(|v| v.as_i64())
                    .sum();
                Ok(json!(total))
            }),
            vec![Argument::List(vec![
                Argument::from(1),
                Argument::from(&upstream),
                Argument::from(2),
            ])],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = sum.wait().await;
    assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!(10));
}

#[tokio::test]
async fn test_dependency_failure_propagates_without_running() {
    let executor = Arc::new(CountingExecutor::new("local"));
    let engine = engine_with(Arc::clone(&executor)).await;

    let failing = engine
        .submit(
            failing_fn("broken"),
            Vec::new(),
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();
    let dependent = engine
        .submit(
            double_fn(),
            vec![Argument::from(&failing)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = dependent.wait().await;
    let failure = outcome.as_ref().as_ref().unwrap_err();
    assert!(failure.is_dependency_failure());
    match &failure.cause {
        TaskError::DependencyFailed { upstream, .. } => {
            assert_eq!(*upstream, failing.task_id());
        }
        other => panic!("expected dependency failure, got {other:?}"),
    }
    // Inherited failures never reach the executor and never consume retries.
    assert!(failure.history.is_empty());
    assert_eq!(
        engine.task_status(dependent.task_id()),
        Some(TaskStatus::DependencyFailed)
    );
    assert_eq!(executor.submissions(), 1);
}

#[tokio::test]
async fn test_sibling_unaffected_by_dependency_failure() {
    let engine = engine_with(Arc::new(CountingExecutor::new("local"))).await;

    let failing = engine
        .submit(
            failing_fn("broken"),
            Vec::new(),
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();
    let dependent = engine
        .submit(
            double_fn(),
            vec![Argument::from(&failing)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();
    let sibling = engine
        .submit(
            double_fn(),
            vec![Argument::from(8)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    assert!(dependent.wait().await.as_ref().is_err());
    let outcome = sibling.wait().await;
    assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!(16));
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failure() {
    let executor = Arc::new(CountingExecutor::new("local"));
    let engine = DataflowEngine::builder()
        .executor(executor.clone())
        .retry_policy(RetryPolicy::new(3))
        .start()
        .await
        .unwrap();

    let handle = engine
        .submit(
            flaky_fn("flaky", 2),
            Vec::new(),
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = handle.wait().await;
    assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!("recovered"));
    assert_eq!(executor.submissions(), 3);
    assert_eq!(engine.task_status(handle.task_id()), Some(TaskStatus::Done));
}

#[tokio::test]
async fn test_retries_exhaust_at_the_bound() {
    let executor = Arc::new(CountingExecutor::new("local"));
    let engine = DataflowEngine::builder()
        .executor(executor.clone())
        .retry_policy(RetryPolicy::new(2))
        .start()
        .await
        .unwrap();

    let handle = engine
        .submit(
            failing_fn("hopeless"),
            Vec::new(),
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = handle.wait().await;
    let failure = outcome.as_ref().as_ref().unwrap_err();
    assert_eq!(failure.history.len(), 2);
    assert!(matches!(failure.cause, TaskError::ExecutionFailed { .. }));
    assert_eq!(executor.submissions(), 2);
    assert_eq!(
        engine.task_status(handle.task_id()),
        Some(TaskStatus::Failed)
    );
}

#[tokio::test]
async fn test_default_policy_gives_single_attempt() {
    let executor = Arc::new(CountingExecutor::new("local"));
    let engine = engine_with(Arc::clone(&executor)).await;

    let handle = engine
        .submit(
            failing_fn("once"),
            Vec::new(),
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = handle.wait().await;
    assert_eq!(outcome.as_ref().as_ref().unwrap_err().history.len(), 1);
    assert_eq!(executor.submissions(), 1);
}

#[tokio::test]
async fn test_memo_hit_skips_execution() {
    let executor = Arc::new(CountingExecutor::new("local"));
    let engine = engine_with(Arc::clone(&executor)).await;
    let calls = Arc::new(AtomicU32::new(0));

    let first = engine
        .submit(
            counting_fn("expensive", json!("result"), Arc::clone(&calls)),
            vec![Argument::from(1)],
            IndexMap::new(),
            SubmitOptions::default().cached(),
        )
        .unwrap();
    first.wait().await;

    let second = engine
        .submit(
            counting_fn("expensive", json!("result"), Arc::clone(&calls)),
            vec![Argument::from(1)],
            IndexMap::new(),
            SubmitOptions::default().cached(),
        )
        .unwrap();
    let outcome = second.wait().await;

    assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!("result"));
    assert_eq!(
        engine.task_status(second.task_id()),
        Some(TaskStatus::MemoDone)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.submissions(), 1);
}

#[tokio::test]
async fn test_different_arguments_miss_the_memo() {
    let executor = Arc::new(CountingExecutor::new("local"));
    let engine = engine_with(Arc::clone(&executor)).await;

    for n in [1, 2] {
        let handle = engine
            .submit(
                double_fn(),
                vec![Argument::from(n)],
                IndexMap::new(),
                SubmitOptions::default().cached(),
            )
            .unwrap();
        handle.wait().await;
    }
    assert_eq!(executor.submissions(), 2);
}

#[tokio::test]
async fn test_ignored_kwargs_do_not_affect_the_memo_key() {
    let executor = Arc::new(CountingExecutor::new("local"));
    let engine = engine_with(Arc::clone(&executor)).await;

    for attempt in [1, 2] {
        let mut kwargs = IndexMap::new();
        kwargs.insert("n".to_string(), Argument::from(9));
        kwargs.insert("attempt_tag".to_string(), Argument::from(attempt));

        let handle = engine
            .submit(
                task_fn("tagged", |_a, k| Ok(k.get("n").cloned().unwrap())),
                Vec::new(),
                kwargs,
                SubmitOptions::default()
                    .cached()
                    .ignore_for_cache(["attempt_tag"]),
            )
            .unwrap();
        let outcome = handle.wait().await;
        assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!(9));
    }
    assert_eq!(executor.submissions(), 1);
}

#[tokio::test]
async fn test_caching_disabled_by_default() {
    let executor = Arc::new(CountingExecutor::new("local"));
    let engine = engine_with(Arc::clone(&executor)).await;

    for _ in 0..2 {
        let handle = engine
            .submit(
                double_fn(),
                vec![Argument::from(4)],
                IndexMap::new(),
                SubmitOptions::default(),
            )
            .unwrap();
        handle.wait().await;
    }
    assert_eq!(executor.submissions(), 2);
}

#[tokio::test]
async fn test_channel_fault_propagates_as_cause() {
    let engine = DataflowEngine::builder()
        .executor(Arc::new(FlakyChannelExecutor::new("remote", u32::MAX)))
        .start()
        .await
        .unwrap();

    let handle = engine
        .submit(
            double_fn(),
            vec![Argument::from(1)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = handle.wait().await;
    let failure = outcome.as_ref().as_ref().unwrap_err();
    match &failure.cause {
        TaskError::Channel(channel) => assert_eq!(channel.hostname(), "worker-1"),
        other => panic!("expected channel fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_channel_fault_is_retried_like_any_failure() {
    let executor = Arc::new(FlakyChannelExecutor::new("remote", 1));
    let engine = DataflowEngine::builder()
        .executor(executor.clone())
        .retry_policy(RetryPolicy::new(2))
        .start()
        .await
        .unwrap();

    let handle = engine
        .submit(
            double_fn(),
            vec![Argument::from(6)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    let outcome = handle.wait().await;
    assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!(12));
    assert_eq!(executor.submissions(), 2);
}

#[tokio::test]
async fn test_missing_declared_outputs_fail_the_task() {
    let temp_dir = TempDir::new().unwrap();
    let absent = temp_dir.path().join("never-created.txt");
    let engine = engine_with(Arc::new(CountingExecutor::new("local"))).await;

    let handle = engine
        .submit(
            task_fn("forgets_outputs", |_a, _k| Ok(json!(null))),
            Vec::new(),
            IndexMap::new(),
            SubmitOptions::default().outputs([&absent]),
        )
        .unwrap();

    let outcome = handle.wait().await;
    let failure = outcome.as_ref().as_ref().unwrap_err();
    match &failure.cause {
        TaskError::MissingOutputs { missing, .. } => {
            assert_eq!(missing.len(), 1);
            assert!(missing[0].contains("never-created.txt"));
        }
        other => panic!("expected missing outputs, got {other:?}"),
    }
}

#[tokio::test]
async fn test_shell_task_runs_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let artifact = temp_dir.path().join("artifact.txt");
    let engine = DataflowEngine::builder()
        .executor(Arc::new(LocalExecutor::new(2)))
        .start()
        .await
        .unwrap();

    let task = ShellTask::new("touch_artifact", |args: &[serde_json::Value], _k: &IndexMap<String, serde_json::Value>| {
        Ok(format!("touch {}", args[0].as_str().unwrap()))
    });

    let handle = engine
        .submit(
            Arc::new(task),
            vec![Argument::from(artifact.to_str().unwrap())],
            IndexMap::new(),
            SubmitOptions::default().outputs([&artifact]),
        )
        .unwrap();

    let outcome = handle.wait().await;
    assert_eq!(*outcome.as_ref().as_ref().unwrap(), json!(0));
    assert!(artifact.exists());
}

#[tokio::test]
async fn test_wait_all_and_status_counts() {
    let engine = engine_with(Arc::new(CountingExecutor::new("local"))).await;

    for n in 0..5 {
        engine
            .submit(
                double_fn(),
                vec![Argument::from(n)],
                IndexMap::new(),
                SubmitOptions::default(),
            )
            .unwrap();
    }
    engine
        .submit(
            failing_fn("broken"),
            Vec::new(),
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    engine.wait_all().await;

    let counts = engine.status_counts();
    assert_eq!(counts.get(&TaskStatus::Done), Some(&5));
    assert_eq!(counts.get(&TaskStatus::Failed), Some(&1));
    assert_eq!(engine.task_count(), 6);
}

#[tokio::test]
async fn test_shutdown_drains_and_clears() {
    let engine = engine_with(Arc::new(CountingExecutor::new("local"))).await;

    let handle = engine
        .submit(
            double_fn(),
            vec![Argument::from(10)],
            IndexMap::new(),
            SubmitOptions::default(),
        )
        .unwrap();

    engine.shutdown().await;

    // In-flight work was drained before the registry was cleared.
    assert!(handle.is_resolved());
    assert_eq!(engine.task_count(), 0);
    assert_eq!(engine.task_status(handle.task_id()), None);
}
