// src/spawner/podman.rs

//! Spawner that isolates each worker in a podman container.
//!
//! One container is created per task from a configured image, the bundled
//! runner binary is copied in, and the container is started with the
//! `task-run` invocation as its command. Host networking is used so the
//! worker can reach the coordinator's status service. A task is alive
//! while its container state is `configured` or `running`.
//!
//! Image pulls go through an advisory cache lock so parallel jobs do not
//! download the same image twice.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{Result, TestdagError};
use crate::registry::RunnerRegistry;
use crate::spawner::Spawner;
use crate::spawner::cache::CacheLock;
use crate::task::Task;
use crate::types::SpawnMethod;

const METHODS: &[SpawnMethod] = &[SpawnMethod::StandaloneExecutable];

/// Container states in which the worker counts as alive.
const ALIVE_STATES: &[&str] = &["configured", "running"];

/// Where the runner binary lands inside the container.
const CONTAINER_RUNNER_PATH: &str = "/usr/local/bin/testdag-runner";

pub struct PodmanSpawner {
    registry: Arc<RunnerRegistry>,
    /// Container image workers are created from.
    image: String,
    podman_bin: String,
    /// Host path of the runner binary copied into each container.
    runner_binary: PathBuf,
    /// Shared image cache directory, guarded per image by [`CacheLock`].
    cache_dir: PathBuf,
    /// task id -> container id
    handles: Mutex<HashMap<String, String>>,
}

impl PodmanSpawner {
    pub fn new(
        registry: Arc<RunnerRegistry>,
        image: &str,
        runner_binary: PathBuf,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            image: image.to_string(),
            podman_bin: "podman".to_string(),
            runner_binary,
            cache_dir,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn container_id(&self, task_id: &str) -> Option<String> {
        self.handles.lock().ok()?.get(task_id).cloned()
    }

    async fn podman(&self, args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new(&self.podman_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| TestdagError::Spawn(format!("running podman: {e}")))?;
        Ok(output)
    }

    /// Pull the image if it is not present, serialized per image.
    async fn ensure_image(&self) -> Result<()> {
        let exists = self.podman(&["image", "exists", &self.image]).await?;
        if exists.status.success() {
            return Ok(());
        }

        let _lock = CacheLock::acquire(&self.cache_dir, &self.image).await?;
        // Another job may have pulled it while we waited for the lock.
        let exists = self.podman(&["image", "exists", &self.image]).await?;
        if exists.status.success() {
            return Ok(());
        }

        debug!(image = %self.image, "pulling container image");
        let pull = self.podman(&["pull", &self.image]).await?;
        if !pull.status.success() {
            return Err(TestdagError::Spawn(format!(
                "pulling image {}: {}",
                self.image,
                String::from_utf8_lossy(&pull.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn create_and_start(&self, task: &Task) -> Result<String> {
        self.ensure_image().await?;

        let task_args = task.get_command_args();
        let mut create: Vec<&str> = vec![
            "create",
            "--net=host",
            &self.image,
            CONTAINER_RUNNER_PATH,
            "task-run",
        ];
        create.extend(task_args.iter().map(String::as_str));

        let created = self.podman(&create).await?;
        if !created.status.success() {
            return Err(TestdagError::Spawn(format!(
                "creating container: {}",
                String::from_utf8_lossy(&created.stderr).trim()
            )));
        }
        let container_id = String::from_utf8_lossy(&created.stdout).trim().to_string();

        let runner = self.runner_binary.to_string_lossy().into_owned();
        let destination = format!("{container_id}:{CONTAINER_RUNNER_PATH}");
        let copied = self.podman(&["cp", &runner, &destination]).await?;
        if !copied.status.success() {
            let _ = self.podman(&["rm", "-f", &container_id]).await;
            return Err(TestdagError::Spawn(format!(
                "copying runner into container: {}",
                String::from_utf8_lossy(&copied.stderr).trim()
            )));
        }

        let started = self.podman(&["start", &container_id]).await?;
        if !started.status.success() {
            let _ = self.podman(&["rm", "-f", &container_id]).await;
            return Err(TestdagError::Spawn(format!(
                "starting container: {}",
                String::from_utf8_lossy(&started.stderr).trim()
            )));
        }

        Ok(container_id)
    }
}

#[async_trait]
impl Spawner for PodmanSpawner {
    fn methods(&self) -> &[SpawnMethod] {
        METHODS
    }

    async fn spawn_task(&self, task: &Task) -> Option<String> {
        match self.create_and_start(task).await {
            Ok(container_id) => {
                debug!(
                    task = %task.identifier,
                    container = %container_id,
                    "container worker started"
                );
                if let Ok(mut handles) = self.handles.lock() {
                    handles.insert(task.identifier.clone(), container_id.clone());
                }
                Some(container_id)
            }
            Err(e) => {
                warn!(task = %task.identifier, error = %e, "podman spawn failed");
                None
            }
        }
    }

    async fn is_task_alive(&self, task_id: &str) -> bool {
        let Some(container_id) = self.container_id(task_id) else {
            return false;
        };
        let inspected = self
            .podman(&["inspect", "-f", "{{.State.Status}}", &container_id])
            .await;
        match inspected {
            Ok(output) if output.status.success() => {
                let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
                ALIVE_STATES.contains(&state.as_str())
            }
            _ => false,
        }
    }

    async fn wait_task(&self, task_id: &str) {
        let Some(container_id) = self.container_id(task_id) else {
            return;
        };
        if let Err(e) = self.podman(&["wait", &container_id]).await {
            debug!(task = %task_id, error = %e, "podman wait failed");
        }
    }

    async fn terminate_task(&self, task_id: &str) -> bool {
        let Some(container_id) = self.container_id(task_id) else {
            return false;
        };
        match self.podman(&["rm", "-f", &container_id]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!(task = %task_id, error = %e, "podman rm failed");
                false
            }
        }
    }

    async fn check_task_requirements(&self, task: &Task) -> bool {
        let version = self.podman(&["--version"]).await;
        if !matches!(version, Ok(output) if output.status.success()) {
            warn!("podman binary not available");
            return false;
        }
        self.registry
            .supports_spawner(&task.runnable.kind, METHODS)
            || self.registry.runner_command(&task.runnable.kind).await.is_ok()
    }

    async fn create_task_output_dir(&self, task: &Task) -> Result<()> {
        // The directory is host-side; jobs bind it into the container when
        // results must survive container removal.
        if let Some(dir) = &task.runnable.output_dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}
