// src/types.rs

//! Small shared enums and constants used across the crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Exit code when every test-category task passed (or skipped/warned).
pub const EXIT_ALL_OK: i32 = 0;
/// Exit code when at least one test-category task failed.
pub const EXIT_TESTS_FAILED: i32 = 1;
/// Exit code when the job itself failed to start (configuration error).
pub const EXIT_JOB_FAIL: i32 = 2;

/// Poll interval for the state machine worker loops.
pub const INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// Grace period given to `terminate_task` before a timed-out task is
/// declared leaked.
pub const TERMINATE_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// The closed set of supported terminal results for a task.
///
/// Any other value arriving in a `finished` message is coerced to
/// [`TaskResult::Error`] by the status repository, with an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Pass,
    Fail,
    Skip,
    Cancel,
    Error,
    Warn,
}

impl TaskResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskResult::Pass => "pass",
            TaskResult::Fail => "fail",
            TaskResult::Skip => "skip",
            TaskResult::Cancel => "cancel",
            TaskResult::Error => "error",
            TaskResult::Warn => "warn",
        }
    }

    /// Whether this result counts as passing for exit-code purposes.
    ///
    /// `warn` is treated as passing.
    pub fn is_passing(&self) -> bool {
        matches!(self, TaskResult::Pass | TaskResult::Skip | TaskResult::Warn)
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pass" => Ok(TaskResult::Pass),
            "fail" => Ok(TaskResult::Fail),
            "skip" => Ok(TaskResult::Skip),
            "cancel" => Ok(TaskResult::Cancel),
            "error" => Ok(TaskResult::Error),
            "warn" => Ok(TaskResult::Warn),
            other => Err(format!("unsupported task result: {other}")),
        }
    }
}

/// Classification of a task within a job.
///
/// Only `test` category results count toward the job's pass/fail tally;
/// `pre_test` and `post_test` tasks are auxiliary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Test,
    PreTest,
    PostTest,
}

impl Default for TaskCategory {
    fn default() -> Self {
        TaskCategory::Test
    }
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Test => "test",
            TaskCategory::PreTest => "pre_test",
            TaskCategory::PostTest => "post_test",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" => Ok(TaskCategory::Test),
            "pre_test" => Ok(TaskCategory::PreTest),
            "post_test" => Ok(TaskCategory::PostTest),
            other => Err(format!(
                "invalid task category: {other} (expected \"test\", \"pre_test\" or \"post_test\")"
            )),
        }
    }
}

/// How a runner for a given kind can be executed by a spawner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnMethod {
    /// The runner is executed in-process by the spawned worker itself
    /// (builtin runners linked into the coordinator binary).
    InProcess,
    /// The runner is a standalone executable named after its kind.
    StandaloneExecutable,
    /// The runner supports any spawn method.
    Any,
}

impl SpawnMethod {
    /// Whether a runner declaring `self` can be driven by a spawner
    /// declaring `other`.
    pub fn is_compatible(&self, other: &SpawnMethod) -> bool {
        matches!(self, SpawnMethod::Any)
            || matches!(other, SpawnMethod::Any)
            || self == other
    }
}
