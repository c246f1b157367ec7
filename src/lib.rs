// src/lib.rs

//! testdag: a distributed test-execution core.
//!
//! A job takes declarative [`runnable::Runnable`] descriptions, expands
//! their dependencies into a task DAG, executes every task in an isolated
//! worker through a [`spawner::Spawner`] backend, and observes them over
//! the newline-delimited-JSON status protocol. The [`job::Job`] coordinator
//! ties it all together.
//!
//! ```no_run
//! use std::sync::Arc;
//! use testdag::job::{CoordinatorContext, Job};
//! use testdag::runnable::Runnable;
//! use testdag::spawner::ProcessSpawner;
//!
//! # async fn demo() {
//! let context = CoordinatorContext::new("/tmp/testdag-results");
//! let registry = Arc::clone(&context.registry);
//! let job = Job::new(context, vec![Runnable::new("noop", Some("example"))]);
//! let outcome = job.run(Arc::new(ProcessSpawner::new(registry))).await;
//! std::process::exit(testdag::job::exit_code(&outcome));
//! # }
//! ```

pub mod dag;
pub mod errors;
pub mod job;
pub mod logging;
pub mod machine;
pub mod registry;
pub mod runnable;
pub mod runner;
pub mod spawner;
pub mod status;
pub mod task;
pub mod types;

pub use errors::{Result, TestdagError};
pub use runnable::{Dependency, Runnable};
pub use task::Task;
pub use types::{TaskCategory, TaskResult};
