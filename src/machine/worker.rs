// src/machine/worker.rs

//! Cooperative worker loop.
//!
//! Each worker repeatedly runs the four phases, each of which advances at
//! most one task by one queue:
//!
//!   bootstrap  requested -> triaging
//!   triage     triaging  -> ready | requeue | finished (triage failures)
//!   start      ready     -> started | finished (spawn failures)
//!   monitor    started   -> monitored -> finished
//!
//! Phases report whether they made progress; an idle iteration sleeps one
//! poll interval. The monitor phase is the only long await, and it races
//! worker exit against the task deadline and the global interrupt.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, warn};

use crate::dag::{dependency_readiness, Readiness};
use crate::machine::TaskStateMachine;
use crate::spawner::Spawner;
use crate::status::message::Message;
use crate::status::repo::StatusRepo;
use crate::task::runtime::RuntimeTaskStatus;
use crate::types::{TaskResult, INTERVAL, TERMINATE_GRACE};

/// How many poll intervals to wait for an exited worker's final message.
const RESULT_SETTLE_POLLS: u32 = 20;

pub struct Worker {
    id: usize,
    machine: Arc<TaskStateMachine>,
    repo: Arc<Mutex<StatusRepo>>,
    spawner: Arc<dyn Spawner>,
    job_id: String,
    /// Base directory for per-task output directories.
    task_dir_base: PathBuf,
    max_triaging: usize,
    max_running: usize,
    failfast: bool,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        machine: Arc<TaskStateMachine>,
        repo: Arc<Mutex<StatusRepo>>,
        spawner: Arc<dyn Spawner>,
        job_id: &str,
        task_dir_base: PathBuf,
        max_triaging: usize,
        max_running: usize,
        failfast: bool,
    ) -> Self {
        Self {
            id,
            machine,
            repo,
            spawner,
            job_id: job_id.to_string(),
            task_dir_base,
            max_triaging,
            max_running,
            failfast,
        }
    }

    /// Drive tasks until the machine is complete.
    pub async fn run(&self) {
        loop {
            if self.machine.interrupted() {
                self.machine.abort_pending("job interrupted").await;
            }
            if self.machine.complete().await {
                break;
            }

            let mut progressed = self.bootstrap().await;
            progressed |= self.triage().await;
            progressed |= self.start().await;
            progressed |= self.monitor().await;

            if !progressed {
                tokio::time::sleep(INTERVAL).await;
            }
        }
        debug!(worker = self.id, "worker loop complete");
    }

    /// requested -> triaging, bounded by `max_triaging`.
    async fn bootstrap(&self) -> bool {
        let mut inner = self.machine.lock().await;
        if inner.triaging.len() >= self.max_triaging {
            return false;
        }
        let Some(idx) = inner.requested.pop_front() else {
            return false;
        };
        inner.tasks[idx].status = RuntimeTaskStatus::Triaging;
        inner.triaging.push(idx);
        true
    }

    /// triaging -> ready, or requeue on unfinished dependencies, or finish
    /// on unsatisfied dependencies / failed requirements.
    async fn triage(&self) -> bool {
        let mut inner = self.machine.lock().await;
        if inner.triaging.is_empty() {
            return false;
        }
        let idx = inner.triaging.remove(0);

        let readiness = match self.repo.lock() {
            Ok(repo) => dependency_readiness(&inner.tasks, idx, &repo),
            Err(_) => {
                warn!("status repository lock poisoned; requeueing task");
                Readiness::Waiting
            }
        };
        match readiness {
            Readiness::Waiting => {
                inner.tasks[idx].status = RuntimeTaskStatus::WaitingDependencies;
                inner.requested.push_back(idx);
                drop(inner);
                // Dependencies need wall-clock time, not another queue pass.
                // Sleeping here keeps the requeue round trip from turning
                // into a hot loop (bootstrap would otherwise report progress
                // for the same task every iteration).
                tokio::time::sleep(INTERVAL).await;
                return false;
            }
            Readiness::Unsatisfied { dependency } => {
                let reason = format!("dependency not satisfied: {dependency}");
                self.post_synthetic_finish(inner.tasks[idx].identifier(), TaskResult::Skip, &reason);
                inner.finish(
                    idx,
                    RuntimeTaskStatus::FinishedWaitDependencies,
                    Some(TaskResult::Skip),
                    Some(reason),
                );
                return true;
            }
            Readiness::Ready => {}
        }

        // Cacheable tasks short-circuit when an identical runnable already
        // passed in this job.
        if inner.tasks[idx].is_cacheable {
            let identity = inner.tasks[idx].task.runnable.identity();
            let hit = inner.tasks.iter().enumerate().any(|(other, t)| {
                other != idx
                    && t.status == RuntimeTaskStatus::FinishedPass
                    && t.task.runnable.identity() == identity
            });
            if hit {
                debug!(task = %inner.tasks[idx].identifier(), "task satisfied from cache");
                inner.finish(
                    idx,
                    RuntimeTaskStatus::FinishedInCache,
                    Some(TaskResult::Pass),
                    None,
                );
                return true;
            }
        }

        // Requirements checks may probe executables; release the lock.
        let task = inner.tasks[idx].task.clone();
        drop(inner);
        let fulfilled = self.spawner.check_task_requirements(&task).await;

        let mut inner = self.machine.lock().await;
        if fulfilled {
            inner.tasks[idx].status = RuntimeTaskStatus::Ready;
            inner.ready.push_back(idx);
        } else {
            inner.finish(
                idx,
                RuntimeTaskStatus::FinishedFailTriage,
                Some(TaskResult::Error),
                Some("task requirements not fulfilled".to_string()),
            );
        }
        true
    }

    /// ready -> started, respecting failfast and the concurrency cap.
    async fn start(&self) -> bool {
        let mut inner = self.machine.lock().await;
        if inner.ready.is_empty() {
            return false;
        }

        if self.failfast && self.any_failure_so_far() {
            inner.abort_queued(
                RuntimeTaskStatus::FinishedFailfast,
                Some(TaskResult::Cancel),
                "test failed with failfast enabled",
            );
            return true;
        }

        if inner.running_count() >= self.max_running {
            if let Some(&front) = inner.ready.front() {
                inner.tasks[front].status = RuntimeTaskStatus::Waiting;
            }
            return false;
        }

        let Some(idx) = inner.ready.pop_front() else {
            return false;
        };
        if let Err(e) = inner.tasks[idx].task.setup_output_dir(&self.task_dir_base) {
            inner.finish(
                idx,
                RuntimeTaskStatus::FinishedFailStart,
                Some(TaskResult::Error),
                Some(format!("could not create task output directory: {e}")),
            );
            return true;
        }

        let task = inner.tasks[idx].task.clone();
        drop(inner);

        // Mirror the output directory into the spawner's execution domain
        // (a no-op for process spawners, a host-side prepare for containers).
        if let Err(e) = self.spawner.create_task_output_dir(&task).await {
            let mut inner = self.machine.lock().await;
            inner.finish(
                idx,
                RuntimeTaskStatus::FinishedFailStart,
                Some(TaskResult::Error),
                Some(format!("could not prepare task output directory: {e}")),
            );
            return true;
        }
        let handle = self.spawner.spawn_task(&task).await;

        let mut inner = self.machine.lock().await;
        match handle {
            Some(handle) => {
                let task = &mut inner.tasks[idx];
                task.spawner_handle = Some(handle);
                task.status = RuntimeTaskStatus::Started;
                task.execution_timeout = task.timeout.map(|t| Instant::now() + t);
                inner.started.push(idx);
            }
            None => {
                inner.finish(
                    idx,
                    RuntimeTaskStatus::FinishedFailStart,
                    Some(TaskResult::Error),
                    Some("spawner failed to start the task".to_string()),
                );
            }
        }
        true
    }

    /// started -> monitored -> finished; the only long await of the loop.
    async fn monitor(&self) -> bool {
        let mut inner = self.machine.lock().await;
        if inner.started.is_empty() {
            return false;
        }
        let idx = inner.started.remove(0);
        inner.monitored.push(idx);
        let identifier = inner.tasks[idx].identifier().to_string();
        let deadline = inner.tasks[idx].execution_timeout;
        drop(inner);

        enum Outcome {
            Exited,
            Timeout,
            Interrupted,
        }

        let monitor_started = Instant::now();
        let interrupt = self.machine.interrupt_token();
        let wait = self.spawner.wait_task(&identifier);
        tokio::pin!(wait);
        let outcome = tokio::select! {
            _ = &mut wait => Outcome::Exited,
            _ = interrupt.cancelled() => Outcome::Interrupted,
            _ = deadline_sleep(deadline) => Outcome::Timeout,
        };

        let (status, result, reason): (RuntimeTaskStatus, Option<TaskResult>, Option<String>) =
            match outcome {
                Outcome::Exited => {
                    // The final status message may still be in flight when
                    // the worker exit is observed; give ingestion a moment.
                    let mut recorded = None;
                    for _ in 0..RESULT_SETTLE_POLLS {
                        recorded = self
                            .repo
                            .lock()
                            .ok()
                            .and_then(|repo| repo.get_task_result(&identifier));
                        if recorded.is_some() {
                            break;
                        }
                        tokio::time::sleep(INTERVAL).await;
                    }
                    match recorded {
                        Some(result) => (RuntimeTaskStatus::from_result(result), Some(result), None),
                        None => {
                            let reason = "worker exited without reporting a result".to_string();
                            self.post_synthetic_finish(&identifier, TaskResult::Error, &reason);
                            (
                                RuntimeTaskStatus::FinishedError,
                                Some(TaskResult::Error),
                                Some(reason),
                            )
                        }
                    }
                }
                Outcome::Timeout => {
                    let reason = "task timeout reached".to_string();
                    self.terminate(&identifier).await;
                    self.post_synthetic_finish(&identifier, TaskResult::Cancel, &reason);
                    (
                        RuntimeTaskStatus::FinishedTimeout,
                        Some(TaskResult::Cancel),
                        Some(reason),
                    )
                }
                Outcome::Interrupted => {
                    let reason = "job interrupted".to_string();
                    self.terminate(&identifier).await;
                    self.post_synthetic_finish(&identifier, TaskResult::Cancel, &reason);
                    (
                        RuntimeTaskStatus::FinishedInterrupted,
                        Some(TaskResult::Cancel),
                        Some(reason),
                    )
                }
            };

        let mut inner = self.machine.lock().await;
        inner.monitored.retain(|&i| i != idx);
        inner.tasks[idx].duration = Some(monitor_started.elapsed());
        inner.finish(idx, status, result, reason);
        true
    }

    /// Best-effort termination with a grace period; a task that outlives it
    /// is considered leaked and only logged.
    async fn terminate(&self, identifier: &str) {
        let terminated =
            tokio::time::timeout(TERMINATE_GRACE, self.spawner.terminate_task(identifier)).await;
        match terminated {
            Ok(true) => debug!(task = %identifier, "task terminated"),
            Ok(false) => debug!(task = %identifier, "task already gone on terminate"),
            Err(_) => warn!(
                task = %identifier,
                grace_secs = TERMINATE_GRACE.as_secs(),
                "termination did not complete within the grace period; task may be leaked"
            ),
        }
    }

    fn any_failure_so_far(&self) -> bool {
        match self.repo.lock() {
            Ok(repo) => {
                !repo.get_tasks_with_result(TaskResult::Fail).is_empty()
                    || !repo.get_tasks_with_result(TaskResult::Error).is_empty()
            }
            Err(_) => false,
        }
    }

    /// Record an outcome for a task that never reported one itself, so the
    /// journals and the aggregate still cover it.
    fn post_synthetic_finish(&self, identifier: &str, result: TaskResult, reason: &str) {
        let mut msg = Message::finished(result).with_fail_reason(reason);
        msg.id = Some(identifier.to_string());
        msg.job_id = Some(self.job_id.clone());
        if let Ok(mut repo) = self.repo.lock() {
            repo.process_message(msg);
        }
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
