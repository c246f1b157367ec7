// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Only [`TestdagError::Config`] is fatal for a job; every other kind is
//! localized to a single task by the state machine or the coordinator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestdagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported kind of runnable: {0}")]
    UnsupportedKind(String),

    #[error("Cycle detected in task dependency graph involving '{0}'")]
    DagCycle(String),

    #[error("Duplicate task identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Spawner failed to create worker: {0}")]
    Spawn(String),

    #[error("Status service unreachable: {0}")]
    Communication(String),

    #[error("Runner produced malformed or inconsistent output: {0}")]
    Runner(String),

    #[error("Task exceeded its execution deadline")]
    Timeout,

    #[error("Job interrupted")]
    Interrupted,

    #[error("Dependency not satisfied: {0}")]
    DependencyUnsatisfied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TestdagError>;
