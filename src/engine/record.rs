// ABOUTME: Task record types - identity, status state machine, and per-task bookkeeping
// ABOUTME: The record is the authoritative mutable state for one submitted task

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::error;

use super::args::Argument;
use super::error::TaskError;
use super::handle::ResultHandle;
use crate::tasks::TaskFn;

/// Unique task identity, assigned monotonically at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle states.
///
/// Transitions only move forward through the state machine; the sole backward
/// edge is `Retrying -> Launched` for a fresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created, dependencies not yet registered.
    Unscheduled,
    /// Waiting for dependencies to resolve.
    Pending,
    /// Launch decision taken; memo consult and dispatch in progress.
    Launched,
    /// Handed to an executor, awaiting its completion signal.
    Running,
    /// Executor reported success and declared outputs were verified.
    ExecDone,
    /// Own execution failed with retries exhausted. Terminal.
    Failed,
    /// An upstream dependency failed. Terminal.
    DependencyFailed,
    /// Own execution failed within the retry bound; awaiting relaunch.
    Retrying,
    /// Served from the memo table without executor interaction. Terminal.
    MemoDone,
    /// Waiting on a nested handle produced as the task's value.
    /// Reserved for join-style tasks; nothing enters it today.
    Joining,
    /// Completed successfully. Terminal.
    Done,
}

impl TaskStatus {
    /// Whether the status is final for the task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::MemoDone | TaskStatus::Failed | TaskStatus::DependencyFailed
        )
    }

    /// Terminal states in which the handle carries a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::DependencyFailed)
    }

    /// Legal direct transitions of the state machine.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (*self, next),
            (Unscheduled, Pending)
                | (Unscheduled, DependencyFailed)
                | (Pending, Launched)
                | (Pending, DependencyFailed)
                | (Launched, MemoDone)
                | (Launched, Running)
                | (Launched, Retrying)
                | (Launched, Failed)
                | (Running, ExecDone)
                | (Running, Retrying)
                | (Running, Failed)
                | (Retrying, Launched)
                | (ExecDone, Joining)
                | (ExecDone, Done)
                | (Joining, Done)
                | (Joining, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Unscheduled => "unscheduled",
            TaskStatus::Pending => "pending",
            TaskStatus::Launched => "launched",
            TaskStatus::Running => "running",
            TaskStatus::ExecDone => "exec_done",
            TaskStatus::Failed => "failed",
            TaskStatus::DependencyFailed => "dependency_failed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::MemoDone => "memo_done",
            TaskStatus::Joining => "joining",
            TaskStatus::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Mutable per-task bookkeeping, guarded by the record's state mutex.
#[derive(Debug)]
pub(crate) struct RecordState {
    pub status: TaskStatus,
    pub fail_count: u32,
    pub fail_history: Vec<TaskError>,
    pub hashsum: Option<String>,
    pub resolved_args: Option<(Vec<Value>, IndexMap<String, Value>)>,
    pub time_submitted: DateTime<Utc>,
    pub time_returned: Option<DateTime<Utc>>,
}

/// The authoritative record for one submitted task.
///
/// Identity, the task function, original (handle-bearing) arguments, and the
/// options are immutable after submission; status and retry bookkeeping live
/// behind a short-critical-section mutex; `launch_lock` serializes the launch
/// decision and is a tokio mutex because it is held across the dispatch await.
pub struct TaskRecord {
    pub id: TaskId,
    pub task_name: String,
    pub func: Arc<dyn TaskFn>,
    pub args: Vec<Argument>,
    pub kwargs: IndexMap<String, Argument>,
    pub depends: Vec<ResultHandle>,
    pub executor: String,
    pub memoize: bool,
    pub checkpointable: bool,
    pub ignore_for_cache: Vec<String>,
    pub outputs: Vec<PathBuf>,
    pub handle: ResultHandle,
    pub(crate) launch_lock: tokio::sync::Mutex<()>,
    state: Mutex<RecordState>,
}

impl TaskRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TaskId,
        func: Arc<dyn TaskFn>,
        args: Vec<Argument>,
        kwargs: IndexMap<String, Argument>,
        depends: Vec<ResultHandle>,
        executor: String,
        memoize: bool,
        checkpointable: bool,
        ignore_for_cache: Vec<String>,
        outputs: Vec<PathBuf>,
    ) -> Self {
        let task_name = func.name().to_string();
        Self {
            id,
            task_name,
            func,
            args,
            kwargs,
            depends,
            executor,
            memoize,
            checkpointable,
            ignore_for_cache,
            outputs,
            handle: ResultHandle::new(id),
            launch_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(RecordState {
                status: TaskStatus::Unscheduled,
                fail_count: 0,
                fail_history: Vec::new(),
                hashsum: None,
                resolved_args: None,
                time_submitted: Utc::now(),
                time_returned: None,
            }),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().expect("record state poisoned").status
    }

    /// Apply a state transition, enforcing the legality table. An illegal
    /// transition is an engine bug: it is logged and refused so observers
    /// never see the machine move backwards.
    pub(crate) fn transition(&self, next: TaskStatus) -> bool {
        let mut state = self.state.lock().expect("record state poisoned");
        if !state.status.can_transition_to(next) {
            error!(
                task_id = %self.id,
                from = %state.status,
                to = %next,
                "illegal task state transition refused"
            );
            return false;
        }
        state.status = next;
        if next.is_terminal() {
            state.time_returned = Some(Utc::now());
        }
        true
    }

    /// Record one execution failure and return the new fail count.
    pub(crate) fn record_failure(&self, cause: TaskError) -> u32 {
        let mut state = self.state.lock().expect("record state poisoned");
        state.fail_count += 1;
        state.fail_history.push(cause);
        state.fail_count
    }

    pub fn fail_count(&self) -> u32 {
        self.state.lock().expect("record state poisoned").fail_count
    }

    pub fn fail_history(&self) -> Vec<TaskError> {
        self.state
            .lock()
            .expect("record state poisoned")
            .fail_history
            .clone()
    }

    pub fn hashsum(&self) -> Option<String> {
        self.state
            .lock()
            .expect("record state poisoned")
            .hashsum
            .clone()
    }

    pub(crate) fn set_hashsum(&self, hashsum: String) {
        self.state.lock().expect("record state poisoned").hashsum = Some(hashsum);
    }

    pub(crate) fn set_resolved_args(&self, args: Vec<Value>, kwargs: IndexMap<String, Value>) {
        self.state
            .lock()
            .expect("record state poisoned")
            .resolved_args = Some((args, kwargs));
    }

    pub(crate) fn resolved_args(&self) -> Option<(Vec<Value>, IndexMap<String, Value>)> {
        self.state
            .lock()
            .expect("record state poisoned")
            .resolved_args
            .clone()
    }

    pub fn time_submitted(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .expect("record state poisoned")
            .time_submitted
    }

    pub fn time_returned(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .expect("record state poisoned")
            .time_returned
    }
}

impl std::fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("task_name", &self.task_name)
            .field("status", &self.status())
            .field("executor", &self.executor)
            .field("memoize", &self.memoize)
            .finish()
    }
}
