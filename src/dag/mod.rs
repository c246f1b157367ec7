// src/dag/mod.rs

//! Dependency graph of runtime tasks.
//!
//! - [`graph`] builds the per-job DAG from test runnables (one pre-task per
//!   dependency, optional post-tasks), provides the stable topological
//!   linearization, and implements the dependency-readiness predicate used
//!   by the state machine's triage phase.

pub mod graph;

pub use graph::{Readiness, TaskGraph, TaskGraphBuilder, dependency_readiness};
