// src/dag/graph.rs

//! Building the per-job task graph.
//!
//! Tests become `test` runtime tasks; each of their dependencies becomes a
//! `pre_test` task with an edge into the dependent. Structurally equal
//! dependencies across the whole job collapse into a single task, so a
//! package needed by ten tests is installed once. Post-test tasks hang off
//! their test and run no matter how it ended.
//!
//! The linearization is deterministic: ties between unordered tasks are
//! broken by insertion order, so the same job file always yields the same
//! schedule.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{Result, TestdagError};
use crate::runnable::{Dependency, Runnable};
use crate::status::repo::StatusRepo;
use crate::task::runtime::{RuntimeTask, TaskIndex};
use crate::task::Task;
use crate::types::{TaskCategory, TaskResult};

/// Outcome of checking a task's dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// All dependencies finished with satisfying results.
    Ready,
    /// At least one dependency has not reached a terminal state yet.
    Waiting,
    /// A dependency finished with a result outside the satisfiable set.
    Unsatisfied { dependency: String },
}

/// Check whether `idx` may start, given the arena and the status repo.
///
/// A dependency's result is taken from the repo when it reported one, and
/// from the arena otherwise (tasks that failed triage or start never
/// report). A terminal dependency with no result at all counts as `error`.
pub fn dependency_readiness(
    tasks: &[RuntimeTask],
    idx: TaskIndex,
    repo: &StatusRepo,
) -> Readiness {
    let satisfiable = &tasks[idx].satisfiable_deps_execution_statuses;
    for &dep in &tasks[idx].dependencies {
        let dep_task = &tasks[dep];
        if !dep_task.status.is_terminal() {
            return Readiness::Waiting;
        }
        let result = repo
            .get_task_result(dep_task.identifier())
            .or_else(|| dep_task.result())
            .unwrap_or(TaskResult::Error);
        if !satisfiable.contains(&result) {
            return Readiness::Unsatisfied {
                dependency: dep_task.identifier().to_string(),
            };
        }
    }
    Readiness::Ready
}

/// Immutable job graph: the task arena plus its topological order.
#[derive(Debug)]
pub struct TaskGraph {
    tasks: Vec<RuntimeTask>,
    order: Vec<TaskIndex>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[RuntimeTask] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut [RuntimeTask] {
        &mut self.tasks
    }

    /// Arena indexes in execution order: every task appears after all of
    /// its dependencies.
    pub fn get_tasks_in_topological_order(&self) -> Vec<TaskIndex> {
        self.order.clone()
    }

    /// Hand the arena and order over to the state machine.
    pub fn into_parts(self) -> (Vec<RuntimeTask>, Vec<TaskIndex>) {
        (self.tasks, self.order)
    }
}

/// Incrementally builds a [`TaskGraph`] for one job.
pub struct TaskGraphBuilder {
    job_id: String,
    status_uris: Vec<String>,
    /// Config snapshot inherited by dependency runnables.
    config: Map<String, Value>,
    tasks: Vec<RuntimeTask>,
    /// Structural dedup of dependency tasks, job-wide.
    dep_index: HashMap<Dependency, TaskIndex>,
    identifiers: HashSet<String>,
    test_count: usize,
}

impl TaskGraphBuilder {
    pub fn new(job_id: &str, status_uris: Vec<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status_uris,
            config: Map::new(),
            tasks: Vec::new(),
            dep_index: HashMap::new(),
            identifiers: HashSet::new(),
            test_count: 0,
        }
    }

    /// Config snapshot passed down to dependency runnables.
    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    fn claim_identifier(&mut self, identifier: &str) -> Result<()> {
        if !self.identifiers.insert(identifier.to_string()) {
            return Err(TestdagError::DuplicateIdentifier(identifier.to_string()));
        }
        Ok(())
    }

    fn push_task(
        &mut self,
        runnable: Runnable,
        identifier: String,
        category: TaskCategory,
        dependencies: Vec<TaskIndex>,
    ) -> Result<TaskIndex> {
        self.claim_identifier(&identifier)?;
        let task = Task::new(
            runnable,
            Some(identifier),
            self.status_uris.clone(),
            category,
            &self.job_id,
        );
        let mut runtime = RuntimeTask::new(task);
        runtime.dependencies = dependencies;
        let idx = self.tasks.len();
        self.tasks.push(runtime);
        Ok(idx)
    }

    /// Find or create the `pre_test` task for a dependency.
    fn ensure_dependency_task(&mut self, dep: &Dependency) -> Result<TaskIndex> {
        if let Some(&idx) = self.dep_index.get(dep) {
            debug!(
                kind = %dep.kind,
                task = %self.tasks[idx].identifier(),
                "dependency deduplicated"
            );
            return Ok(idx);
        }

        let runnable = dep.to_runnable(self.config.clone());
        let identifier = format!("pre-{}-{}", dep.kind, &runnable.identity()[..12]);
        let idx = self.push_task(runnable, identifier, TaskCategory::PreTest, Vec::new())?;
        self.tasks[idx].is_cacheable = true;
        self.dep_index.insert(dep.clone(), idx);
        Ok(idx)
    }

    /// Add one test runnable, expanding its dependencies into `pre_test`
    /// tasks with edges into the test.
    pub fn add_test_runnable(&mut self, runnable: Runnable) -> Result<TaskIndex> {
        let mut pre = Vec::with_capacity(runnable.dependencies.len());
        for dep in &runnable.dependencies {
            pre.push(self.ensure_dependency_task(dep)?);
        }

        self.test_count += 1;
        let identifier = format!("{}-{}", self.test_count, runnable.identifier());
        self.push_task(runnable, identifier, TaskCategory::Test, pre)
    }

    /// Add a teardown task that runs after `test`, whatever its outcome.
    pub fn add_post_runnable(&mut self, test: TaskIndex, runnable: Runnable) -> Result<TaskIndex> {
        let identifier = format!(
            "{}-post-{}",
            self.tasks[test].identifier(),
            runnable.identifier()
        );
        let idx = self.push_task(runnable, identifier, TaskCategory::PostTest, vec![test])?;
        self.tasks[idx].satisfiable_deps_execution_statuses = HashSet::from([
            TaskResult::Pass,
            TaskResult::Fail,
            TaskResult::Skip,
            TaskResult::Cancel,
            TaskResult::Error,
            TaskResult::Warn,
        ]);
        Ok(idx)
    }

    /// Add an explicit ordering edge: `dependent` runs after `dependency`.
    ///
    /// Used for orderings that do not come from a [`Dependency`] record,
    /// e.g. sequencing constraints between tests. The edge participates in
    /// cycle detection.
    pub fn add_edge(&mut self, dependency: TaskIndex, dependent: TaskIndex) {
        if !self.tasks[dependent].dependencies.contains(&dependency) {
            self.tasks[dependent].dependencies.push(dependency);
        }
    }

    /// Validate the graph and compute the execution order.
    pub fn build(self) -> Result<TaskGraph> {
        let mut graph: DiGraphMap<TaskIndex, ()> = DiGraphMap::new();
        for idx in 0..self.tasks.len() {
            graph.add_node(idx);
        }
        for (idx, task) in self.tasks.iter().enumerate() {
            for &dep in &task.dependencies {
                graph.add_edge(dep, idx, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let member = self.tasks[cycle.node_id()].identifier().to_string();
            return Err(TestdagError::DagCycle(member));
        }

        // Kahn's algorithm with the smallest index first, so ties between
        // unordered tasks resolve to insertion order.
        let mut indegree = vec![0usize; self.tasks.len()];
        let mut dependents: Vec<Vec<TaskIndex>> = vec![Vec::new(); self.tasks.len()];
        for (idx, task) in self.tasks.iter().enumerate() {
            indegree[idx] = task.dependencies.len();
            for &dep in &task.dependencies {
                dependents[dep].push(idx);
            }
        }

        let mut ready: std::collections::BTreeSet<TaskIndex> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(idx, _)| idx)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(&idx) = ready.iter().next() {
            ready.remove(&idx);
            order.push(idx);
            for &dependent in &dependents[idx] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        debug_assert_eq!(order.len(), self.tasks.len());

        debug!(tasks = self.tasks.len(), "task graph built");
        Ok(TaskGraph {
            tasks: self.tasks,
            order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_runnable(uri: &str) -> Runnable {
        Runnable::new("noop", Some(uri))
    }

    fn builder() -> TaskGraphBuilder {
        TaskGraphBuilder::new("job-1", vec!["127.0.0.1:9999".to_string()])
    }

    #[test]
    fn dependencies_precede_dependents() {
        let mut b = builder();
        let mut runnable = test_runnable("/t/one");
        runnable.dependencies.push(Dependency::new("package", Some("gcc")));
        b.add_test_runnable(runnable).unwrap();

        let graph = b.build().unwrap();
        let order = graph.get_tasks_in_topological_order();
        assert_eq!(order.len(), 2);
        let tasks = graph.tasks();
        assert_eq!(tasks[order[0]].task.category, TaskCategory::PreTest);
        assert_eq!(tasks[order[1]].task.category, TaskCategory::Test);
    }

    #[test]
    fn equal_dependencies_share_one_task() {
        let mut b = builder();
        for uri in ["/t/one", "/t/two"] {
            let mut runnable = test_runnable(uri);
            runnable.dependencies.push(Dependency::new("package", Some("gcc")));
            b.add_test_runnable(runnable).unwrap();
        }

        let graph = b.build().unwrap();
        // one shared pre-task plus two tests
        assert_eq!(graph.len(), 3);
        let pre: Vec<_> = graph
            .tasks()
            .iter()
            .filter(|t| t.task.category == TaskCategory::PreTest)
            .collect();
        assert_eq!(pre.len(), 1);
    }

    #[test]
    fn differing_kwargs_do_not_deduplicate() {
        let mut b = builder();
        for version in ["1.0", "2.0"] {
            let mut dep = Dependency::new("package", Some("gcc"));
            dep.kwargs
                .insert("version".to_string(), Value::String(version.to_string()));
            let mut runnable = test_runnable(&format!("/t/{version}"));
            runnable.dependencies.push(dep);
            b.add_test_runnable(runnable).unwrap();
        }
        assert_eq!(b.build().unwrap().len(), 4);
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let mut b = builder();
        b.add_test_runnable(test_runnable("/t/one")).unwrap();
        let test = 0;
        b.add_post_runnable(test, test_runnable("/t/cleanup")).unwrap();
        let err = b
            .add_post_runnable(test, test_runnable("/t/cleanup"))
            .unwrap_err();
        assert!(matches!(err, TestdagError::DuplicateIdentifier(_)));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut b = builder();
        let one = b.add_test_runnable(test_runnable("/t/one")).unwrap();
        let two = b.add_test_runnable(test_runnable("/t/two")).unwrap();
        b.add_edge(one, two);
        b.add_edge(two, one);
        let err = b.build().unwrap_err();
        assert!(matches!(err, TestdagError::DagCycle(_)));
    }

    #[test]
    fn explicit_edge_orders_tests() {
        let mut b = builder();
        let one = b.add_test_runnable(test_runnable("/t/one")).unwrap();
        let two = b.add_test_runnable(test_runnable("/t/two")).unwrap();
        b.add_edge(two, one);
        let order = b.build().unwrap().get_tasks_in_topological_order();
        assert_eq!(order, vec![two, one]);
    }

    #[test]
    fn order_is_stable_across_builds() {
        let build_order = || {
            let mut b = builder();
            for uri in ["/t/c", "/t/a", "/t/b"] {
                b.add_test_runnable(test_runnable(uri)).unwrap();
            }
            b.build().unwrap().get_tasks_in_topological_order()
        };
        assert_eq!(build_order(), build_order());
        assert_eq!(build_order(), vec![0, 1, 2]);
    }

    #[test]
    fn readiness_follows_dependency_results() {
        let mut b = builder();
        let mut runnable = test_runnable("/t/one");
        runnable.dependencies.push(Dependency::new("package", Some("gcc")));
        let test = b.add_test_runnable(runnable).unwrap();
        let (mut tasks, _) = b.build().unwrap().into_parts();

        let repo = StatusRepo::new("job-1");
        assert_eq!(dependency_readiness(&tasks, test, &repo), Readiness::Waiting);

        let dep = tasks[test].dependencies[0];
        tasks[dep].finish(
            crate::task::runtime::RuntimeTaskStatus::FinishedPass,
            Some(TaskResult::Pass),
        );
        assert_eq!(dependency_readiness(&tasks, test, &repo), Readiness::Ready);
    }

    #[test]
    fn failed_dependency_is_unsatisfied() {
        let mut b = builder();
        let mut runnable = test_runnable("/t/one");
        runnable.dependencies.push(Dependency::new("package", Some("gcc")));
        let test = b.add_test_runnable(runnable).unwrap();
        let (mut tasks, _) = b.build().unwrap().into_parts();
        let dep = tasks[test].dependencies[0];
        tasks[dep].finish(
            crate::task::runtime::RuntimeTaskStatus::FinishedFail,
            Some(TaskResult::Fail),
        );

        let repo = StatusRepo::new("job-1");
        match dependency_readiness(&tasks, test, &repo) {
            Readiness::Unsatisfied { dependency } => {
                assert_eq!(dependency, tasks[dep].identifier());
            }
            other => panic!("unexpected readiness: {other:?}"),
        }
    }

    #[test]
    fn post_task_runs_after_failed_test() {
        let mut b = builder();
        let test = b.add_test_runnable(test_runnable("/t/one")).unwrap();
        let post = b.add_post_runnable(test, test_runnable("/t/cleanup")).unwrap();
        let (mut tasks, _) = b.build().unwrap().into_parts();
        tasks[test].finish(
            crate::task::runtime::RuntimeTaskStatus::FinishedFail,
            Some(TaskResult::Fail),
        );

        let repo = StatusRepo::new("job-1");
        assert_eq!(dependency_readiness(&tasks, post, &repo), Readiness::Ready);
    }
}
