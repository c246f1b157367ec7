// src/spawner/mod.rs

//! Worker-lifecycle abstraction.
//!
//! A spawner creates, probes, waits for and reaps the isolated workers
//! that execute tasks. The state machine only ever talks to the [`Spawner`]
//! trait; concrete backends are:
//!
//! - [`process`] — a child process on the coordinator host.
//! - [`podman`] — a container per task.
//! - [`lxc`] — a system container per task, with a pool of pre-named slots.
//!
//! A scripted mock for tests lives in the `testdag-test-utils` crate.

pub mod cache;
pub mod lxc;
pub mod podman;
pub mod process;

use async_trait::async_trait;

use crate::errors::Result;
use crate::task::Task;
use crate::types::SpawnMethod;

pub use lxc::LxcSpawner;
pub use podman::PodmanSpawner;
pub use process::ProcessSpawner;

/// Worker lifecycle contract.
///
/// `spawn_task` reports failure as `None` rather than an error: a spawn
/// failure is task-local (terminal `FINISHED_FAIL_START`) and must never
/// abort the job. `terminate_task` is best-effort and idempotent.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// The spawn methods this spawner can drive.
    fn methods(&self) -> &[SpawnMethod];

    /// Create a worker for the task.
    ///
    /// Returns the opaque spawner handle (PID, container id, ...) on
    /// success, `None` on failure.
    async fn spawn_task(&self, task: &Task) -> Option<String>;

    /// Whether the worker for this task is still alive.
    async fn is_task_alive(&self, task_id: &str) -> bool;

    /// Suspend until the worker exits (or liveness goes false).
    async fn wait_task(&self, task_id: &str);

    /// Best-effort, idempotent termination of the worker.
    ///
    /// Returns whether a worker was actually terminated by this call.
    async fn terminate_task(&self, task_id: &str) -> bool;

    /// Whether this spawner can satisfy the task's requirements (runner
    /// availability, backend binary, compatible spawn method).
    async fn check_task_requirements(&self, task: &Task) -> bool;

    /// Ensure the task's output directory exists in the execution domain.
    async fn create_task_output_dir(&self, task: &Task) -> Result<()>;
}
