// src/spawner/process.rs

//! Spawner that runs each worker as a child process on the host.
//!
//! The worker command is `<runner-command> task-run <task args>`, where
//! the runner command is resolved through the registry (the bundled
//! `testdag-runner` for builtin kinds, `testdag-runner-<kind>` for
//! external ones). The handle is the OS process id; a task is alive while
//! its exit status is unset.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::registry::RunnerRegistry;
use crate::spawner::Spawner;
use crate::task::Task;
use crate::types::SpawnMethod;

const METHODS: &[SpawnMethod] = &[SpawnMethod::InProcess, SpawnMethod::StandaloneExecutable];

/// Bookkeeping for one spawned child.
struct ProcessHandle {
    /// Requests the monitor task to kill the child.
    kill: CancellationToken,
    /// Flips to true once the child has exited.
    finished: watch::Receiver<bool>,
}

pub struct ProcessSpawner {
    registry: Arc<RunnerRegistry>,
    handles: Mutex<HashMap<String, ProcessHandle>>,
}

impl ProcessSpawner {
    pub fn new(registry: Arc<RunnerRegistry>) -> Self {
        Self {
            registry,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn handle_snapshot(&self, task_id: &str) -> Option<(CancellationToken, watch::Receiver<bool>)> {
        let handles = self.handles.lock().ok()?;
        handles
            .get(task_id)
            .map(|h| (h.kill.clone(), h.finished.clone()))
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    fn methods(&self) -> &[SpawnMethod] {
        METHODS
    }

    async fn spawn_task(&self, task: &Task) -> Option<String> {
        let command = match self.registry.runner_command(&task.runnable.kind).await {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    task = %task.identifier,
                    kind = %task.runnable.kind,
                    error = %e,
                    "no runner command for task"
                );
                return None;
            }
        };

        let (program, prefix_args) = command.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(prefix_args)
            .arg("task-run")
            .args(task.get_command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    task = %task.identifier,
                    command = %program,
                    error = %e,
                    "failed to spawn worker process"
                );
                return None;
            }
        };

        let pid = child.id().unwrap_or_default();
        let kill = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);

        // Monitor the child: either it exits on its own, or a kill is
        // requested (timeout / interrupt) and we reap it.
        let task_id = task.identifier.clone();
        let monitor_kill = kill.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => debug!(
                            task = %task_id,
                            code = status.code().unwrap_or(-1),
                            "worker process exited"
                        ),
                        Err(e) => warn!(task = %task_id, error = %e, "waiting for worker failed"),
                    }
                }
                _ = monitor_kill.cancelled() => {
                    if let Err(e) = child.kill().await {
                        debug!(task = %task_id, error = %e, "worker already gone on kill");
                    }
                    let _ = child.wait().await;
                    info!(task = %task_id, "worker process terminated");
                }
            }
            let _ = finished_tx.send(true);
        });

        if let Ok(mut handles) = self.handles.lock() {
            handles.insert(
                task.identifier.clone(),
                ProcessHandle {
                    kill,
                    finished: finished_rx,
                },
            );
        }

        debug!(task = %task.identifier, pid, "worker process spawned");
        Some(pid.to_string())
    }

    async fn is_task_alive(&self, task_id: &str) -> bool {
        match self.handle_snapshot(task_id) {
            Some((_, finished)) => !*finished.borrow(),
            None => false,
        }
    }

    async fn wait_task(&self, task_id: &str) {
        let Some((_, mut finished)) = self.handle_snapshot(task_id) else {
            return;
        };
        while !*finished.borrow() {
            if finished.changed().await.is_err() {
                break;
            }
        }
    }

    async fn terminate_task(&self, task_id: &str) -> bool {
        let Some((kill, mut finished)) = self.handle_snapshot(task_id) else {
            return false;
        };
        if *finished.borrow() {
            return false;
        }
        kill.cancel();
        while !*finished.borrow() {
            if finished.changed().await.is_err() {
                break;
            }
        }
        true
    }

    async fn check_task_requirements(&self, task: &Task) -> bool {
        let kind = &task.runnable.kind;
        if !self.registry.supports_spawner(kind, METHODS) && self.registry.is_known(kind) {
            warn!(kind = %kind, "runner spawn methods incompatible with process spawner");
            return false;
        }
        self.registry.runner_command(kind).await.is_ok()
    }

    async fn create_task_output_dir(&self, task: &Task) -> Result<()> {
        if let Some(dir) = &task.runnable.output_dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}
