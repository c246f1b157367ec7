// src/job/mod.rs

//! Job coordination.
//!
//! A [`Job`] takes a set of test runnables, builds the task graph, binds
//! the status service, runs a pool of state-machine workers against a
//! spawner, and aggregates the outcome. All knobs travel in the
//! [`CoordinatorContext`]; there is no global mutable state.

pub mod results;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dag::TaskGraphBuilder;
use crate::errors::{Result, TestdagError};
use crate::machine::{TaskStateMachine, Worker, default_max_running};
use crate::registry::RunnerRegistry;
use crate::runnable::Runnable;
use crate::spawner::Spawner;
use crate::status::repo::StatusRepo;
use crate::status::server::StatusServer;
use crate::task::runtime::RuntimeTask;
use crate::types::{EXIT_ALL_OK, EXIT_JOB_FAIL, EXIT_TESTS_FAILED, TaskCategory, TaskResult};

/// Process exit code for the outcome of [`Job::run`].
///
/// A job that failed to run at all (setup, bind or graph errors) maps to
/// [`EXIT_JOB_FAIL`]; a completed job reports its own code.
pub fn exit_code(outcome: &Result<JobSummary>) -> i32 {
    match outcome {
        Ok(summary) => summary.exit_code(),
        Err(_) => EXIT_JOB_FAIL,
    }
}

/// Everything a job needs, carried explicitly.
pub struct CoordinatorContext {
    pub job_id: String,
    /// Base results directory; this job writes under `<results>/<job-id>/`.
    pub results_dir: PathBuf,
    /// Status service bind URI. TCP with port 0 picks a free port.
    pub status_uri: String,
    pub registry: Arc<RunnerRegistry>,
    /// Config snapshot handed to dependency runnables.
    pub config: Map<String, Value>,
    pub max_triaging: usize,
    pub max_running: usize,
    pub failfast: bool,
    /// Persist a raw status-message dump per task.
    pub debug_output: bool,
}

impl CoordinatorContext {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        let max_running = default_max_running();
        Self {
            job_id: Uuid::new_v4().to_string(),
            results_dir: results_dir.into(),
            status_uri: "127.0.0.1:0".to_string(),
            registry: Arc::new(RunnerRegistry::with_builtin_runners()),
            config: Map::new(),
            max_triaging: max_running,
            max_running,
            failfast: false,
            debug_output: false,
        }
    }

    pub fn with_job_id(mut self, job_id: &str) -> Self {
        self.job_id = job_id.to_string();
        self
    }

    pub fn with_status_uri(mut self, uri: &str) -> Self {
        self.status_uri = uri.to_string();
        self
    }

    pub fn with_failfast(mut self, failfast: bool) -> Self {
        self.failfast = failfast;
        self
    }

    pub fn with_debug_output(mut self, debug_output: bool) -> Self {
        self.debug_output = debug_output;
        self
    }

    pub fn with_max_running(mut self, max_running: usize) -> Self {
        self.max_running = max_running.max(1);
        self.max_triaging = self.max_triaging.max(self.max_running);
        self
    }
}

/// Final aggregate of one job run.
#[derive(Debug)]
pub struct JobSummary {
    pub job_id: String,
    /// Result counts over test-category tasks only.
    pub stats: BTreeMap<TaskResult, usize>,
    pub total_tests: usize,
    pub interrupted: bool,
}

impl JobSummary {
    fn build(job_id: &str, tasks: &[RuntimeTask], interrupted: bool) -> Self {
        let mut stats: BTreeMap<TaskResult, usize> = BTreeMap::new();
        let mut total_tests = 0;
        for task in tasks {
            if task.task.category != TaskCategory::Test {
                continue;
            }
            total_tests += 1;
            let result = task.result().unwrap_or(TaskResult::Error);
            *stats.entry(result).or_insert(0) += 1;
        }
        Self {
            job_id: job_id.to_string(),
            stats,
            total_tests,
            interrupted,
        }
    }

    /// Whether every test passed (pass, skip and warn count as passing).
    pub fn all_passed(&self) -> bool {
        self.stats
            .iter()
            .all(|(result, count)| *count == 0 || result.is_passing())
    }

    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            EXIT_ALL_OK
        } else {
            EXIT_TESTS_FAILED
        }
    }

    /// Human-readable one-job summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "job {}", self.job_id);
        let _ = writeln!(out, "  tests: {}", self.total_tests);
        for (result, count) in &self.stats {
            let _ = writeln!(out, "  {:>5}: {}", result.as_str(), count);
        }
        if self.interrupted {
            let _ = writeln!(out, "  (interrupted)");
        }
        out
    }
}

pub struct Job {
    context: CoordinatorContext,
    runnables: Vec<Runnable>,
    /// Teardown runnables attached to every test.
    post_test_runnables: Vec<Runnable>,
    interrupt: CancellationToken,
}

impl Job {
    pub fn new(context: CoordinatorContext, runnables: Vec<Runnable>) -> Self {
        Self {
            context,
            runnables,
            post_test_runnables: Vec::new(),
            interrupt: CancellationToken::new(),
        }
    }

    /// Attach a teardown runnable that runs after each test, whatever its
    /// outcome.
    pub fn with_post_test_runnable(mut self, runnable: Runnable) -> Self {
        self.post_test_runnables.push(runnable);
        self
    }

    /// Token that interrupts the job when cancelled.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Run the job to completion against the given spawner.
    pub async fn run(self, spawner: Arc<dyn Spawner>) -> Result<JobSummary> {
        let ctx = &self.context;
        let job_dir = ctx.results_dir.join(&ctx.job_id);
        let task_dir_base = job_dir.join(results::TEST_RESULTS_DIR);
        std::fs::create_dir_all(&task_dir_base)?;

        // Status service first: the effective URI (a free TCP port, for
        // instance) goes into every task.
        let repo = Arc::new(Mutex::new(StatusRepo::new(&ctx.job_id)));
        let server_cancel = CancellationToken::new();
        let server =
            StatusServer::bind(&ctx.status_uri, Arc::clone(&repo), server_cancel.clone()).await?;
        let status_uri = server.local_uri().to_string();
        let server_handle = server.spawn();

        let mut builder = TaskGraphBuilder::new(&ctx.job_id, vec![status_uri])
            .with_config(ctx.config.clone());
        for runnable in self.runnables {
            let test = builder.add_test_runnable(runnable)?;
            for post in &self.post_test_runnables {
                builder.add_post_runnable(test, post.clone())?;
            }
        }
        let graph = builder.build()?;
        info!(job = %ctx.job_id, tasks = graph.len(), "job starting");

        let machine = Arc::new(TaskStateMachine::new(graph));

        // External interrupt and Ctrl-C both stop the machine. The listener
        // must exit with the job so the machine's Arc is released.
        let listener_stop = CancellationToken::new();
        let listener = {
            let machine = Arc::clone(&machine);
            let interrupt = self.interrupt.clone();
            let stop = listener_stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = interrupt.cancelled() => {}
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!(error = %e, "could not listen for interrupt signal");
                            return;
                        }
                    }
                }
                machine.interrupt();
            })
        };

        let mut workers = Vec::with_capacity(ctx.max_running);
        for id in 0..ctx.max_running {
            let worker = Worker::new(
                id,
                Arc::clone(&machine),
                Arc::clone(&repo),
                Arc::clone(&spawner),
                &ctx.job_id,
                task_dir_base.clone(),
                ctx.max_triaging,
                ctx.max_running,
                ctx.failfast,
            );
            workers.push(tokio::spawn(async move { worker.run().await }));
        }
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }

        listener_stop.cancel();
        let _ = listener.await;
        server_cancel.cancel();
        let _ = server_handle.await;

        let interrupted = machine.interrupted();
        let machine = Arc::into_inner(machine).ok_or_else(|| {
            TestdagError::Runner("state machine still shared after workers exited".to_string())
        })?;
        let tasks = machine.into_tasks();

        let summary = {
            let repo = repo
                .lock()
                .map_err(|_| TestdagError::Runner("status repository lock poisoned".to_string()))?;
            results::persist(&job_dir, &tasks, &repo, ctx.debug_output)?;
            JobSummary::build(&ctx.job_id, &tasks, interrupted)
        };
        std::fs::write(job_dir.join("job.log"), summary.render())?;

        info!(job = %summary.job_id, exit = summary.exit_code(), "job complete");
        Ok(summary)
    }
}
