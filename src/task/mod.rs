// src/task/mod.rs

//! Tasks: runnables bound to a job.
//!
//! A [`Task`] gives a [`Runnable`] a unique identifier, a job id, a
//! category and the status endpoints it reports to. [`runtime`] adds the
//! execution-state wrapper used by the state machine.

pub mod runtime;

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{Result, TestdagError};
use crate::registry::RunnerRegistry;
use crate::runnable::Runnable;
use crate::status::message::{Message, MessageStatus};
use crate::types::TaskCategory;

pub use runtime::{RuntimeTask, RuntimeTaskStatus, TaskIndex};

/// A runnable bound to a unique identifier within a job.
#[derive(Debug, Clone)]
pub struct Task {
    pub runnable: Runnable,
    /// Unique within the job. Assigned a fresh UUID when not provided.
    pub identifier: String,
    pub job_id: String,
    /// Only `test` category results count toward the job tally.
    pub category: TaskCategory,
    /// Status-sink endpoints this task reports to, in order.
    pub status_uris: Vec<String>,
}

impl Task {
    pub fn new(
        runnable: Runnable,
        identifier: Option<String>,
        status_uris: Vec<String>,
        category: TaskCategory,
        job_id: &str,
    ) -> Self {
        let identifier = identifier.unwrap_or_else(|| Uuid::new_v4().to_string());
        let status_uris = if status_uris.is_empty() {
            runnable.status_server_uri().into_iter().collect()
        } else {
            status_uris
        };
        Self {
            runnable,
            identifier,
            job_id: job_id.to_string(),
            category,
            status_uris,
        }
    }

    /// Read a task (with its embedded runnable) from a task recipe file.
    ///
    /// Recognized keys: `id`, `runnable` (a runnable recipe), `status_uris`
    /// (a list, or a single string which is normalized), `category`,
    /// `job_id`.
    pub fn from_recipe(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let doc: Value = serde_json::from_str(&contents)
            .map_err(|e| TestdagError::Config(format!("malformed task recipe: {e}")))?;

        let runnable_doc = doc
            .get("runnable")
            .ok_or_else(|| TestdagError::Config("task recipe is missing 'runnable'".to_string()))?;
        let runnable = Runnable::from_recipe_value(runnable_doc)?;

        let identifier = doc.get("id").and_then(Value::as_str).map(str::to_string);
        let status_uris = match doc.get("status_uris") {
            Some(Value::String(uri)) => vec![uri.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        let category = doc
            .get("category")
            .and_then(Value::as_str)
            .map(|s| s.parse::<TaskCategory>())
            .transpose()
            .map_err(TestdagError::Config)?
            .unwrap_or_default();
        let job_id = doc
            .get("job_id")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(Self::new(runnable, identifier, status_uris, category, job_id))
    }

    /// Create a uniquely-named output directory under `base` and assign it
    /// to the runnable. Idempotent.
    pub fn setup_output_dir(&mut self, base: impl AsRef<Path>) -> Result<PathBuf> {
        if let Some(existing) = &self.runnable.output_dir {
            return Ok(PathBuf::from(existing));
        }
        let dir = base.as_ref().join(fs_safe_identifier(&self.identifier));
        std::fs::create_dir_all(&dir)?;
        self.runnable.output_dir = Some(dir.to_string_lossy().into_owned());
        Ok(dir)
    }

    /// The argument vector for the standalone worker interface.
    pub fn get_command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.identifier.clone(),
            "-j".to_string(),
            self.job_id.clone(),
        ];
        args.extend(self.runnable.get_command_args());
        for uri in &self.status_uris {
            args.push("-s".to_string());
            args.push(uri.clone());
        }
        args.push("-t".to_string());
        args.push(self.category.as_str().to_string());
        args
    }

    /// Execute this task's runner in-process, forwarding augmented status
    /// messages into `tx`.
    ///
    /// Every message gains `id` and `job_id`; the first `started` message
    /// gains `output_dir`. The stream always ends with exactly one
    /// `finished` message: when a runner ends without one, a synthetic
    /// `result=error` message is injected.
    pub async fn run(&mut self, registry: &RunnerRegistry, tx: mpsc::Sender<Message>) -> Result<()> {
        self.ensure_output_dir()?;

        let runner = registry.pick_runner(&self.runnable.kind)?;

        let (runner_tx, mut runner_rx) = mpsc::channel::<Message>(64);
        let runnable = self.runnable.clone();
        let kind = self.runnable.kind.clone();
        let runner_handle = tokio::spawn(async move { runner.run(&runnable, runner_tx).await });

        let mut saw_finished = false;
        while let Some(mut msg) = runner_rx.recv().await {
            if saw_finished {
                debug!(
                    task = %self.identifier,
                    "runner emitted a message after finished; discarding"
                );
                continue;
            }
            self.augment(&mut msg);
            if msg.status == MessageStatus::Finished {
                saw_finished = true;
            }
            if tx.send(msg).await.is_err() {
                break;
            }
        }

        if let Err(e) = runner_handle
            .await
            .map_err(|e| TestdagError::Runner(format!("runner task for '{kind}' panicked: {e}")))?
        {
            debug!(task = %self.identifier, error = %e, "runner finished with an error");
        }

        if !saw_finished {
            let mut synthetic = Message::finished(crate::types::TaskResult::Error)
                .with_fail_reason("runner exited without finish");
            self.augment(&mut synthetic);
            let _ = tx.send(synthetic).await;
        }

        Ok(())
    }

    fn ensure_output_dir(&mut self) -> Result<()> {
        if self.runnable.output_dir.is_none() {
            let base = std::env::temp_dir().join(format!(".testdag-task-{}", Uuid::new_v4()));
            std::fs::create_dir_all(&base)?;
            self.runnable.output_dir = Some(base.to_string_lossy().into_owned());
        }
        Ok(())
    }

    fn augment(&self, msg: &mut Message) {
        msg.id = Some(self.identifier.clone());
        msg.job_id = Some(self.job_id.clone());
        if msg.status == MessageStatus::Started {
            if let Some(dir) = &self.runnable.output_dir {
                msg.extra
                    .insert("output_dir".to_string(), Value::String(dir.clone()));
            }
        }
    }
}

/// Map a task identifier to a filesystem-safe directory name.
pub fn fs_safe_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
