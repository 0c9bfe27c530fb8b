// ABOUTME: The dataflow engine - submission surface, launch coordination, and completion wiring
// ABOUTME: Decides launch-vs-reuse-vs-fail-fast exactly once per task attempt

use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::args::Argument;
use super::checkpoint::{CheckpointEntry, CheckpointStore};
use super::dependency::{self, SubstituteError};
use super::error::{CheckpointError, SubmitError, TaskError, TaskFailure};
use super::handle::ResultHandle;
use super::memo::{hash_invocation, Memoizer};
use super::record::{TaskId, TaskRecord, TaskStatus};
use super::registry::TaskRegistry;
use super::retry::RetryPolicy;
use crate::executors::{Executor, Invocation};
use crate::tasks::TaskFn;

/// Per-submission options.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Participate in memoization.
    pub cache: bool,
    /// Persist a successful result to the checkpoint store (requires `cache`).
    pub checkpoint: bool,
    /// Keyword parameters excluded from the memo key.
    pub ignore_for_cache: Vec<String>,
    /// Ordered executor candidates; empty means any registered executor.
    pub executors: Vec<String>,
    /// Output artifacts that must exist after a successful run.
    pub outputs: Vec<PathBuf>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            cache: false,
            checkpoint: true,
            ignore_for_cache: Vec::new(),
            executors: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl SubmitOptions {
    /// Enable memoization for this submission.
    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    pub fn ignore_for_cache(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignore_for_cache = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_executor(mut self, label: impl Into<String>) -> Self {
        self.executors.push(label.into());
        self
    }

    pub fn outputs(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.outputs = paths.into_iter().map(Into::into).collect();
        self
    }
}

/// Builder for a [`DataflowEngine`].
pub struct DataflowBuilder {
    executors: Vec<Arc<dyn Executor>>,
    retry_policy: RetryPolicy,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl DataflowBuilder {
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
            retry_policy: RetryPolicy::default(),
            checkpoint_store: None,
        }
    }

    /// Register an execution backend. The first registered executor is the
    /// default when a submission names no candidates.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Attach a persisted checkpoint store. Its entries seed the memo table
    /// at startup and checkpointable successes are appended to it.
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Build the engine, loading any persisted checkpoints.
    pub async fn start(self) -> Result<DataflowEngine, CheckpointError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let memoizer = Memoizer::new();

        if let Some(store) = &self.checkpoint_store {
            let entries = store.load().await?;
            let seeded = memoizer.seed(entries.into_iter().map(|e| (e.hashsum, e.value)));
            info!(run_id = %run_id, seeded, "seeded memo table from checkpoints");
        }

        let mut executors = IndexMap::new();
        for executor in self.executors {
            executors.insert(executor.label().to_string(), executor);
        }

        info!(
            run_id = %run_id,
            executors = executors.len(),
            max_attempts = self.retry_policy.max_attempts,
            "dataflow engine started"
        );

        Ok(DataflowEngine {
            inner: Arc::new(EngineInner {
                run_id,
                next_task_id: AtomicU64::new(1),
                registry: TaskRegistry::new(),
                memoizer,
                checkpoint_store: self.checkpoint_store,
                executors,
                retry_policy: self.retry_policy,
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

impl Default for DataflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The dataflow task-orchestration engine.
///
/// Callers submit a task function plus arguments, which may embed other
/// tasks' [`ResultHandle`]s; the engine waits on those dependencies, decides
/// launch-vs-reuse-vs-fail-fast exactly once per task, dispatches to a
/// registered executor, and resolves the returned handle with the outcome.
///
/// The engine is cheap to clone; clones share all state.
#[derive(Clone)]
pub struct DataflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    run_id: String,
    next_task_id: AtomicU64,
    registry: TaskRegistry,
    memoizer: Memoizer,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    executors: IndexMap<String, Arc<dyn Executor>>,
    retry_policy: RetryPolicy,
    shut_down: AtomicBool,
}

impl DataflowEngine {
    pub fn builder() -> DataflowBuilder {
        DataflowBuilder::new()
    }

    /// Unique id of this engine run.
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Submit one task for execution.
    ///
    /// Returns the task's result handle immediately; execution is deferred
    /// until every handle embedded in the arguments has resolved. Submission
    /// itself only fails synchronously, for malformed options.
    #[instrument(skip(self, func, args, kwargs, options), fields(task = %func.name()))]
    pub fn submit(
        &self,
        func: Arc<dyn TaskFn>,
        args: Vec<Argument>,
        kwargs: IndexMap<String, Argument>,
        options: SubmitOptions,
    ) -> Result<ResultHandle, SubmitError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(SubmitError::EngineShutdown);
        }

        let executor = self.inner.select_executor(&options.executors)?;
        let depends = dependency::extract_handles(&args, &kwargs)?;

        let id = TaskId::new(self.inner.next_task_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(TaskRecord::new(
            id,
            func,
            args,
            kwargs,
            depends,
            executor,
            options.cache,
            options.checkpoint,
            options.ignore_for_cache,
            options.outputs,
        ));
        record.transition(TaskStatus::Pending);
        self.inner.registry.insert(Arc::clone(&record));

        info!(
            task_id = %id,
            task = %record.task_name,
            executor = %record.executor,
            depends = record.depends.len(),
            memoize = record.memoize,
            "task submitted"
        );

        let handle = record.handle.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive(record).await });
        Ok(handle)
    }

    /// Current status of a task, if it belongs to this engine.
    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner.registry.get(id).map(|r| r.status())
    }

    /// Number of tasks ever submitted to this engine.
    pub fn task_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Snapshot of how many tasks are in each status.
    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        self.inner.registry.status_counts()
    }

    /// Wait until every submitted task's handle has resolved.
    ///
    /// Re-snapshots after each pass so tasks submitted while waiting are
    /// covered too.
    pub async fn wait_all(&self) {
        loop {
            let unresolved: Vec<_> = self
                .inner
                .registry
                .snapshot()
                .into_iter()
                .filter(|record| !record.handle.is_resolved())
                .collect();
            if unresolved.is_empty() {
                return;
            }
            for record in unresolved {
                record.handle.wait().await;
            }
        }
    }

    /// Stop accepting submissions, drain in-flight tasks, and clear the
    /// registry. Checkpoint appends happen eagerly on each success, so
    /// shutdown persists nothing further.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        self.wait_all().await;

        let counts = self.inner.registry.status_counts();
        info!(
            run_id = %self.inner.run_id,
            tasks = self.inner.registry.len(),
            ?counts,
            "dataflow engine shut down"
        );
        self.inner.registry.clear();
    }
}

impl EngineInner {
    fn select_executor(&self, candidates: &[String]) -> Result<String, SubmitError> {
        if candidates.is_empty() {
            return self
                .executors
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| SubmitError::UnknownExecutor {
                    candidates: Vec::new(),
                });
        }
        candidates
            .iter()
            .find(|label| self.executors.contains_key(*label))
            .cloned()
            .ok_or_else(|| SubmitError::UnknownExecutor {
                candidates: candidates.to_vec(),
            })
    }

    /// Wait for the task's dependencies, then hand it to the launch
    /// coordinator for its first attempt.
    async fn drive(self: Arc<Self>, record: Arc<TaskRecord>) {
        dependency::wait_all(&record.depends).await;
        self.launch(record, 1).await;
    }

    /// The launch coordinator: decides the fate of one attempt exactly once.
    ///
    /// The per-record launch lock is held across argument substitution,
    /// hashsum computation, the memo consult, the resulting state
    /// transition, and the dispatch call, so racing readiness signals can
    /// never double-launch an attempt.
    async fn launch(self: &Arc<Self>, record: Arc<TaskRecord>, attempt: u32) {
        let guard = record.launch_lock.lock().await;

        // Only an undecided first attempt or a scheduled retry may proceed;
        // anything else means this attempt was already decided.
        let status = record.status();
        let may_launch = matches!(
            (status, attempt),
            (TaskStatus::Pending, 1) | (TaskStatus::Retrying, 2..)
        );
        if !may_launch {
            debug!(task_id = %record.id, %status, attempt, "launch skipped, already decided");
            return;
        }

        if attempt == 1 {
            match dependency::substitute(&record.args, &record.kwargs) {
                Ok((args, kwargs)) => record.set_resolved_args(args, kwargs),
                Err(SubstituteError::DependencyFailed { upstream, cause }) => {
                    info!(
                        task_id = %record.id,
                        %upstream,
                        "dependency failed, task will not run"
                    );
                    record.transition(TaskStatus::DependencyFailed);
                    record.handle.resolve(Err(TaskFailure {
                        task_id: record.id,
                        cause: TaskError::DependencyFailed {
                            upstream,
                            cause: Box::new(cause),
                        },
                        history: Vec::new(),
                    }));
                    return;
                }
                Err(SubstituteError::Unresolved { upstream }) => {
                    // The wait condition ran first, so this is an engine bug;
                    // fail the task rather than hang its dependents.
                    error!(task_id = %record.id, %upstream, "dependency unresolved at launch");
                    record.transition(TaskStatus::DependencyFailed);
                    record.handle.resolve(Err(TaskFailure {
                        task_id: record.id,
                        cause: TaskError::ExecutionFailed {
                            task: record.task_name.clone(),
                            message: format!("dependency {upstream} unresolved at launch"),
                        },
                        history: Vec::new(),
                    }));
                    return;
                }
            }
        }

        record.transition(TaskStatus::Launched);
        let (args, kwargs) = match record.resolved_args() {
            Some(resolved) => resolved,
            None => {
                error!(task_id = %record.id, "no resolved arguments at launch");
                drop(guard);
                self.handle_failure(
                    record.clone(),
                    TaskError::ExecutionFailed {
                        task: record.task_name.clone(),
                        message: "no resolved arguments at launch".to_string(),
                    },
                )
                .await;
                return;
            }
        };

        // Memo consult happens only on the first attempt: a retry exists
        // because the prior attempt failed, and failures are never cached.
        if record.memoize && attempt == 1 {
            let hashsum = hash_invocation(
                &record.task_name,
                &args,
                &kwargs,
                &record.ignore_for_cache,
            );
            record.set_hashsum(hashsum.clone());
            if let Some(value) = self.memoizer.check(&hashsum) {
                info!(task_id = %record.id, task = %record.task_name, "memo hit, reusing result");
                record.transition(TaskStatus::MemoDone);
                record.handle.resolve(Ok(value));
                return;
            }
        }

        let executor = match self.executors.get(&record.executor) {
            Some(executor) => Arc::clone(executor),
            None => {
                // Validated at submission; only reachable if an executor set
                // could change at runtime, which it cannot.
                error!(task_id = %record.id, executor = %record.executor, "executor disappeared");
                drop(guard);
                self.handle_failure(
                    record.clone(),
                    TaskError::ExecutionFailed {
                        task: record.task_name.clone(),
                        message: format!("executor '{}' not registered", record.executor),
                    },
                )
                .await;
                return;
            }
        };

        let invocation = Invocation {
            task_id: record.id,
            task_name: record.task_name.clone(),
            func: Arc::clone(&record.func),
            args,
            kwargs,
        };

        debug!(
            task_id = %record.id,
            task = %record.task_name,
            executor = %record.executor,
            attempt,
            "dispatching to executor"
        );

        match executor.submit(invocation).await {
            Ok(exec_handle) => {
                record.transition(TaskStatus::Running);
                // The completion callback is registered before the launch
                // guard is released.
                let inner = Arc::clone(self);
                let rec = Arc::clone(&record);
                tokio::spawn(async move {
                    let outcome = exec_handle.completion(&rec.task_name).await;
                    inner.handle_completion(rec, outcome).await;
                });
            }
            Err(dispatch_error) => {
                let cause = dispatch_error.into_task_error(&record.task_name);
                warn!(task_id = %record.id, %cause, "executor refused dispatch");
                // Release the launch guard first: a retry re-enters launch().
                drop(guard);
                self.handle_failure(record, cause).await;
            }
        }
    }

    /// Wire one executor completion back into the record and handle.
    async fn handle_completion(
        self: Arc<Self>,
        record: Arc<TaskRecord>,
        outcome: Result<serde_json::Value, TaskError>,
    ) {
        match outcome {
            Ok(value) => {
                if let Some(missing) = self.missing_outputs(&record).await {
                    self.handle_failure(
                        record.clone(),
                        TaskError::MissingOutputs {
                            task: record.task_name.clone(),
                            missing,
                        },
                    )
                    .await;
                    return;
                }

                record.transition(TaskStatus::ExecDone);

                if record.memoize {
                    if let Some(hashsum) = record.hashsum() {
                        self.memoizer.update(hashsum.clone(), value.clone());
                        if record.checkpointable {
                            if let Some(store) = &self.checkpoint_store {
                                let entry = CheckpointEntry {
                                    hashsum,
                                    value: value.clone(),
                                };
                                if let Err(e) = store.append(&entry).await {
                                    warn!(task_id = %record.id, error = %e, "checkpoint append failed");
                                }
                            }
                        }
                    }
                }

                record.transition(TaskStatus::Done);
                info!(
                    task_id = %record.id,
                    task = %record.task_name,
                    attempts = record.fail_count() + 1,
                    "task completed"
                );
                record.handle.resolve(Ok(value));
            }
            Err(cause) => self.handle_failure(record, cause).await,
        }
    }

    /// Type-erased wrapper around [`Self::launch`] for the retry path; the
    /// boxed return type breaks the opaque-future recursion cycle.
    fn launch_boxed(
        self: Arc<Self>,
        record: Arc<TaskRecord>,
        attempt: u32,
    ) -> futures::future::BoxFuture<'static, ()> {
        Box::pin(async move { self.launch(record, attempt).await })
    }

    /// Apply the retry policy to one execution failure.
    ///
    /// Must not be called while the record's launch guard is held: a retry
    /// re-enters the launch coordinator.
    async fn handle_failure(self: &Arc<Self>, record: Arc<TaskRecord>, cause: TaskError) {
        let fail_count = record.record_failure(cause.clone());

        if self.retry_policy.should_retry(fail_count) {
            warn!(
                task_id = %record.id,
                task = %record.task_name,
                fail_count,
                max_attempts = self.retry_policy.max_attempts,
                %cause,
                "attempt failed, retrying"
            );
            record.transition(TaskStatus::Retrying);
            let inner = Arc::clone(self);
            // Box the retry re-entry: `launch` is indirectly recursive via
            // `handle_failure`, and the type erasure lets the compiler prove
            // the spawned future is `Send`.
            tokio::spawn(inner.launch_boxed(record, fail_count + 1));
        } else {
            error!(
                task_id = %record.id,
                task = %record.task_name,
                fail_count,
                %cause,
                "retries exhausted, task failed"
            );
            record.transition(TaskStatus::Failed);
            record.handle.resolve(Err(TaskFailure {
                task_id: record.id,
                cause,
                history: record.fail_history(),
            }));
        }
    }

    /// Declared output artifacts absent after an otherwise successful run.
    async fn missing_outputs(&self, record: &TaskRecord) -> Option<Vec<String>> {
        let mut missing = Vec::new();
        for path in &record.outputs {
            let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
            if !exists {
                missing.push(path.display().to_string());
            }
        }
        if missing.is_empty() {
            None
        } else {
            Some(missing)
        }
    }
}
