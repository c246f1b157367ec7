// src/job/results.rs

//! Persisted results layout.
//!
//! Under `<results>/<job-id>/`:
//!
//! ```text
//! job.log                       human-readable summary
//! results.json                  machine-readable aggregate
//! test-results/<task-dir>/
//!     data                      pointer to the task's output directory
//!     stdout                    streamed stdout chunks, concatenated
//!     stderr                    streamed stderr chunks, concatenated
//!     debug                     raw status-message dump (debug runs only)
//! sysinfo/pre/<task-dir>/       same artifacts for pre_test tasks
//! sysinfo/post/<task-dir>/      same artifacts for post_test tasks
//! ```
//!
//! The task directory name is the filesystem-safe rendering of the task
//! identifier, the same one `setup_output_dir` uses.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::json;
use tracing::debug;

use crate::errors::Result;
use crate::status::repo::StatusRepo;
use crate::task::fs_safe_identifier;
use crate::task::runtime::RuntimeTask;
use crate::types::TaskCategory;

pub const TEST_RESULTS_DIR: &str = "test-results";
pub const SYSINFO_DIR: &str = "sysinfo";

/// Write the per-task artifacts and the job aggregate.
///
/// `debug_output` adds a raw status-message dump per task.
pub fn persist(
    job_dir: &Path,
    tasks: &[RuntimeTask],
    repo: &StatusRepo,
    debug_output: bool,
) -> Result<()> {
    for task in tasks {
        let base = match task.task.category {
            TaskCategory::Test => job_dir.join(TEST_RESULTS_DIR),
            TaskCategory::PreTest => job_dir.join(SYSINFO_DIR).join("pre"),
            TaskCategory::PostTest => job_dir.join(SYSINFO_DIR).join("post"),
        };
        fs::create_dir_all(&base)?;
        persist_task(&base, task, repo, debug_output)?;
    }

    let aggregate = aggregate_json(repo.job_id(), tasks);
    fs::write(
        job_dir.join("results.json"),
        serde_json::to_string_pretty(&aggregate)?,
    )?;

    debug!(dir = %job_dir.display(), "job results persisted");
    Ok(())
}

fn persist_task(
    base: &Path,
    task: &RuntimeTask,
    repo: &StatusRepo,
    debug_output: bool,
) -> Result<()> {
    let dir = base.join(fs_safe_identifier(task.identifier()));
    fs::create_dir_all(&dir)?;

    if let Some(output_dir) = &task.task.runnable.output_dir {
        fs::write(dir.join("data"), format!("{output_dir}\n"))?;
    }

    let Some(journal) = repo.get_task_data(task.identifier()) else {
        return Ok(());
    };

    let mut stdout = fs::File::create(dir.join("stdout"))?;
    let mut stderr = fs::File::create(dir.join("stderr"))?;
    let mut debug_dump = if debug_output {
        Some(fs::File::create(dir.join("debug"))?)
    } else {
        None
    };

    for msg in journal {
        if let Some(dump) = debug_dump.as_mut() {
            dump.write_all(msg.to_wire().as_bytes())?;
            dump.write_all(b"\n")?;
        }
        if let (Some(stream), Some(bytes)) = (msg.stream_type(), msg.log_bytes()) {
            match stream {
                "stdout" => stdout.write_all(&bytes)?,
                "stderr" => stderr.write_all(&bytes)?,
                _ => {}
            }
        }
    }
    Ok(())
}

fn aggregate_json(job_id: &str, tasks: &[RuntimeTask]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = tasks
        .iter()
        .map(|task| {
            json!({
                "id": task.identifier(),
                "category": task.task.category,
                "status": task.status.to_string(),
                "result": task.result(),
                "fail_reason": task.fail_reason,
                "duration_secs": task.duration.map(|d| d.as_secs_f64()),
            })
        })
        .collect();
    json!({
        "job_id": job_id,
        "total": tasks.len(),
        "tasks": entries,
    })
}
