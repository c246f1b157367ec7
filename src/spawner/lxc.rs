// src/spawner/lxc.rs

//! Spawner backed by LXC system containers.
//!
//! Comparable to the podman backend, with one difference: a pool of
//! pre-named container "slots" is consulted first, and new containers are
//! only created when every slot is busy. Slots are returned to the pool
//! when their task is waited for or terminated; created containers are
//! destroyed instead.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{Result, TestdagError};
use crate::registry::RunnerRegistry;
use crate::spawner::Spawner;
use crate::task::Task;
use crate::types::SpawnMethod;

const METHODS: &[SpawnMethod] = &[SpawnMethod::StandaloneExecutable];

/// Container states in which the worker counts as alive.
const ALIVE_STATES: &[&str] = &["STARTING", "RUNNING"];

#[derive(Debug, Clone)]
struct LxcHandle {
    container: String,
    /// Pooled slots go back to the pool; created containers are destroyed.
    pooled: bool,
}

pub struct LxcSpawner {
    registry: Arc<RunnerRegistry>,
    /// Template used by `lxc-create` for non-pooled containers.
    template: String,
    lxc_prefix: String,
    /// Pre-named slots, consumed before any container is created.
    slots: Mutex<Vec<String>>,
    handles: Mutex<HashMap<String, LxcHandle>>,
}

impl LxcSpawner {
    pub fn new(registry: Arc<RunnerRegistry>, template: &str, slots: Vec<String>) -> Self {
        Self {
            registry,
            template: template.to_string(),
            lxc_prefix: "lxc".to_string(),
            slots: Mutex::new(slots),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self, task_id: &str) -> Option<LxcHandle> {
        self.handles.lock().ok()?.get(task_id).cloned()
    }

    async fn lxc(&self, subcommand: &str, args: &[&str]) -> Result<std::process::Output> {
        let program = format!("{}-{subcommand}", self.lxc_prefix);
        let output = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| TestdagError::Spawn(format!("running {program}: {e}")))?;
        Ok(output)
    }

    /// Take a pooled slot, or create a fresh container.
    async fn acquire_container(&self, task_id: &str) -> Result<LxcHandle> {
        let pooled = self.slots.lock().ok().and_then(|mut s| s.pop());
        if let Some(container) = pooled {
            debug!(task = %task_id, container = %container, "using pooled lxc slot");
            return Ok(LxcHandle {
                container,
                pooled: true,
            });
        }

        let container = format!("testdag-{}", crate::task::fs_safe_identifier(task_id));
        let created = self
            .lxc("create", &["-n", &container, "-t", &self.template])
            .await?;
        if !created.status.success() {
            return Err(TestdagError::Spawn(format!(
                "creating lxc container: {}",
                String::from_utf8_lossy(&created.stderr).trim()
            )));
        }
        Ok(LxcHandle {
            container,
            pooled: false,
        })
    }

    async fn release(&self, task_id: &str) {
        let handle = match self.handles.lock().ok().and_then(|mut h| h.remove(task_id)) {
            Some(handle) => handle,
            None => return,
        };
        let _ = self.lxc("stop", &["-n", &handle.container, "-k"]).await;
        if handle.pooled {
            if let Ok(mut slots) = self.slots.lock() {
                slots.push(handle.container);
            }
        } else {
            let _ = self.lxc("destroy", &["-n", &handle.container]).await;
        }
    }
}

#[async_trait]
impl Spawner for LxcSpawner {
    fn methods(&self) -> &[SpawnMethod] {
        METHODS
    }

    async fn spawn_task(&self, task: &Task) -> Option<String> {
        let handle = match self.acquire_container(&task.identifier).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(task = %task.identifier, error = %e, "lxc acquire failed");
                return None;
            }
        };

        let args = task.get_command_args();
        let mut start: Vec<&str> = vec![
            "-n",
            &handle.container,
            "--",
            "testdag-runner",
            "task-run",
        ];
        start.extend(args.iter().map(String::as_str));

        match self.lxc("execute", &start).await {
            Ok(output) if output.status.success() || output.status.code().is_none() => {}
            Ok(output) => {
                warn!(
                    task = %task.identifier,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "lxc execute failed"
                );
                return None;
            }
            Err(e) => {
                warn!(task = %task.identifier, error = %e, "lxc execute failed");
                return None;
            }
        }

        let container = handle.container.clone();
        if let Ok(mut handles) = self.handles.lock() {
            handles.insert(task.identifier.clone(), handle);
        }
        debug!(task = %task.identifier, container = %container, "lxc worker started");
        Some(container)
    }

    async fn is_task_alive(&self, task_id: &str) -> bool {
        let Some(handle) = self.handle(task_id) else {
            return false;
        };
        let info = self
            .lxc("info", &["-n", &handle.container, "-s", "-H"])
            .await;
        match info {
            Ok(output) if output.status.success() => {
                let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
                ALIVE_STATES.contains(&state.as_str())
            }
            _ => false,
        }
    }

    async fn wait_task(&self, task_id: &str) {
        let Some(handle) = self.handle(task_id) else {
            return;
        };
        let _ = self
            .lxc("wait", &["-n", &handle.container, "-s", "STOPPED"])
            .await;
        self.release(task_id).await;
    }

    async fn terminate_task(&self, task_id: &str) -> bool {
        if self.handle(task_id).is_none() {
            return false;
        }
        self.release(task_id).await;
        true
    }

    async fn check_task_requirements(&self, task: &Task) -> bool {
        let version = self.lxc("info", &["--version"]).await;
        if version.is_err() {
            warn!("lxc tooling not available");
            return false;
        }
        self.registry
            .supports_spawner(&task.runnable.kind, METHODS)
            || self.registry.runner_command(&task.runnable.kind).await.is_ok()
    }

    async fn create_task_output_dir(&self, task: &Task) -> Result<()> {
        if let Some(dir) = &task.runnable.output_dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}
