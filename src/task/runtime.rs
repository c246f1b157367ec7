// src/task/runtime.rs

//! Execution-state wrapper around [`Task`].
//!
//! The coordinator owns an arena of [`RuntimeTask`]s; every other component
//! refers to tasks by [`TaskIndex`], so there are no reference cycles
//! between tasks, spawners and the job.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::task::Task;
use crate::types::TaskResult;

/// Index of a runtime task within the job's arena.
pub type TaskIndex = usize;

/// Lifecycle state of a runtime task.
///
/// The machine buckets are coarser than the result taxonomy: the precise
/// result string lives in [`RuntimeTask::result`], while this enum tracks
/// which queue the task belongs to and why it left the last one. Entry
/// into any `Finished*` state is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeTaskStatus {
    Requested,
    Triaging,
    Ready,
    /// Kept in the ready queue because the concurrency cap was reached.
    Waiting,
    /// Re-queued to requested while dependencies are still running.
    WaitingDependencies,
    Started,
    FinishedPass,
    FinishedFail,
    FinishedError,
    FinishedInterrupted,
    FinishedTimeout,
    FinishedInCache,
    FinishedFailTriage,
    FinishedFailStart,
    FinishedFailfast,
    FinishedWaitDependencies,
}

impl RuntimeTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RuntimeTaskStatus::FinishedPass
                | RuntimeTaskStatus::FinishedFail
                | RuntimeTaskStatus::FinishedError
                | RuntimeTaskStatus::FinishedInterrupted
                | RuntimeTaskStatus::FinishedTimeout
                | RuntimeTaskStatus::FinishedInCache
                | RuntimeTaskStatus::FinishedFailTriage
                | RuntimeTaskStatus::FinishedFailStart
                | RuntimeTaskStatus::FinishedFailfast
                | RuntimeTaskStatus::FinishedWaitDependencies
        )
    }

    /// Terminal state derived from a task's final message result.
    pub fn from_result(result: TaskResult) -> Self {
        match result {
            TaskResult::Fail => RuntimeTaskStatus::FinishedFail,
            TaskResult::Error => RuntimeTaskStatus::FinishedError,
            TaskResult::Cancel => RuntimeTaskStatus::FinishedInterrupted,
            TaskResult::Pass | TaskResult::Skip | TaskResult::Warn => {
                RuntimeTaskStatus::FinishedPass
            }
        }
    }
}

impl fmt::Display for RuntimeTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeTaskStatus::Requested => "REQUESTED",
            RuntimeTaskStatus::Triaging => "TRIAGING",
            RuntimeTaskStatus::Ready => "READY",
            RuntimeTaskStatus::Waiting => "WAITING",
            RuntimeTaskStatus::WaitingDependencies => "WAITING_DEPENDENCIES",
            RuntimeTaskStatus::Started => "STARTED",
            RuntimeTaskStatus::FinishedPass => "FINISHED_PASS",
            RuntimeTaskStatus::FinishedFail => "FINISHED_FAIL",
            RuntimeTaskStatus::FinishedError => "FINISHED_ERROR",
            RuntimeTaskStatus::FinishedInterrupted => "FINISHED_INTERRUPTED",
            RuntimeTaskStatus::FinishedTimeout => "FINISHED_TIMEOUT",
            RuntimeTaskStatus::FinishedInCache => "FINISHED_IN_CACHE",
            RuntimeTaskStatus::FinishedFailTriage => "FINISHED_FAIL_TRIAGE",
            RuntimeTaskStatus::FinishedFailStart => "FINISHED_FAIL_START",
            RuntimeTaskStatus::FinishedFailfast => "FINISHED_FAILFAST",
            RuntimeTaskStatus::FinishedWaitDependencies => "FINISHED_WAIT_DEPENDENCIES",
        };
        f.write_str(s)
    }
}

/// A task plus the live execution state tracked by the state machine.
#[derive(Debug)]
pub struct RuntimeTask {
    pub task: Task,
    pub status: RuntimeTaskStatus,
    /// Terminal result; set at most once, only on finish.
    result: Option<TaskResult>,
    /// Human-readable reason accompanying skip/error outcomes.
    pub fail_reason: Option<String>,
    /// Per-task execution timeout, read from the runnable's `timeout`
    /// kwarg (seconds) when present.
    pub timeout: Option<Duration>,
    /// Absolute deadline, armed when the task starts.
    pub execution_timeout: Option<Instant>,
    /// Opaque spawner-specific reference (PID, container id, ...).
    pub spawner_handle: Option<String>,
    /// Upstream tasks, as arena indexes.
    pub dependencies: Vec<TaskIndex>,
    /// Dependency results that let this task proceed.
    pub satisfiable_deps_execution_statuses: HashSet<TaskResult>,
    pub is_cacheable: bool,
    /// Wall-clock duration, recorded by the monitor phase.
    pub duration: Option<Duration>,
}

impl RuntimeTask {
    pub fn new(task: Task) -> Self {
        let timeout = task
            .runnable
            .kwargs
            .get("timeout")
            .and_then(Value::as_f64)
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64);

        Self {
            task,
            status: RuntimeTaskStatus::Requested,
            result: None,
            fail_reason: None,
            timeout,
            execution_timeout: None,
            spawner_handle: None,
            dependencies: Vec::new(),
            satisfiable_deps_execution_statuses: HashSet::from([TaskResult::Pass]),
            is_cacheable: false,
            duration: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.task.identifier
    }

    pub fn result(&self) -> Option<TaskResult> {
        self.result
    }

    /// Move the task into a terminal state.
    ///
    /// The result is recorded only once; later calls keep the first value,
    /// which preserves the finished-once invariant under replays.
    pub fn finish(&mut self, status: RuntimeTaskStatus, result: Option<TaskResult>) {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        if self.result.is_none() {
            self.result = result;
        }
    }
}
