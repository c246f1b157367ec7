// src/machine/mod.rs

//! The task state machine.
//!
//! One job owns one [`TaskStateMachine`]: the runtime-task arena plus the
//! six queues (requested, triaging, ready, started, monitored, finished)
//! behind a single async mutex. A pool of cooperative [`Worker`]s drives
//! tasks through the queues; all spawner I/O happens outside the lock, so
//! holding it is always brief.
//!
//! A global interrupt token drains the pending queues and terminates
//! whatever is running; it propagates within one poll interval.

pub mod worker;

use std::collections::VecDeque;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dag::TaskGraph;
use crate::task::runtime::{RuntimeTask, RuntimeTaskStatus, TaskIndex};
use crate::types::TaskResult;

pub use worker::Worker;

/// Default concurrency cap: `2 * CPUs - 1`.
pub fn default_max_running() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (2 * cpus).saturating_sub(1).max(1)
}

pub(crate) struct MachineInner {
    pub(crate) tasks: Vec<RuntimeTask>,
    pub(crate) requested: VecDeque<TaskIndex>,
    pub(crate) triaging: Vec<TaskIndex>,
    pub(crate) ready: VecDeque<TaskIndex>,
    pub(crate) started: Vec<TaskIndex>,
    pub(crate) monitored: Vec<TaskIndex>,
    pub(crate) finished: Vec<TaskIndex>,
}

impl MachineInner {
    /// Move a task into a terminal state and onto the finished queue.
    pub(crate) fn finish(
        &mut self,
        idx: TaskIndex,
        status: RuntimeTaskStatus,
        result: Option<TaskResult>,
        fail_reason: Option<String>,
    ) {
        let task = &mut self.tasks[idx];
        if task.status.is_terminal() {
            return;
        }
        if task.fail_reason.is_none() {
            task.fail_reason = fail_reason;
        }
        task.finish(status, result);
        self.finished.push(idx);
        info!(
            task = %self.tasks[idx].identifier(),
            status = %self.tasks[idx].status,
            "task finished"
        );
    }

    /// Drain the pending queues (requested, triaging, ready) into the given
    /// terminal state. Started tasks are not touched; their monitors handle
    /// termination.
    pub(crate) fn abort_queued(
        &mut self,
        status: RuntimeTaskStatus,
        result: Option<TaskResult>,
        reason: &str,
    ) {
        let pending: Vec<TaskIndex> = self
            .requested
            .drain(..)
            .chain(self.triaging.drain(..))
            .chain(self.ready.drain(..))
            .collect();
        for idx in pending {
            self.finish(idx, status, result, Some(reason.to_string()));
        }
    }

    /// Tasks currently occupying execution slots.
    pub(crate) fn running_count(&self) -> usize {
        self.started.len() + self.monitored.len()
    }
}

pub struct TaskStateMachine {
    inner: Mutex<MachineInner>,
    interrupt: CancellationToken,
}

impl TaskStateMachine {
    pub fn new(graph: TaskGraph) -> Self {
        let (tasks, order) = graph.into_parts();
        Self {
            inner: Mutex::new(MachineInner {
                tasks,
                requested: order.into(),
                triaging: Vec::new(),
                ready: VecDeque::new(),
                started: Vec::new(),
                monitored: Vec::new(),
                finished: Vec::new(),
            }),
            interrupt: CancellationToken::new(),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, MachineInner> {
        self.inner.lock().await
    }

    /// Request a global interrupt. Idempotent.
    pub fn interrupt(&self) {
        if !self.interrupt.is_cancelled() {
            info!("state machine interrupt requested");
            self.interrupt.cancel();
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    pub(crate) fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Whether every task has reached a terminal state.
    pub async fn complete(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.finished.len() == inner.tasks.len()
    }

    /// Drain the pending queues on interrupt.
    pub async fn abort_pending(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        inner.abort_queued(
            RuntimeTaskStatus::FinishedInterrupted,
            Some(TaskResult::Cancel),
            reason,
        );
    }

    /// Consume the machine, handing the arena back for aggregation.
    pub fn into_tasks(self) -> Vec<RuntimeTask> {
        self.inner.into_inner().tasks
    }
}
