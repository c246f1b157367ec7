#![allow(dead_code)]

use serde_json::{json, Value};
use testdag::runnable::{Dependency, Runnable};
use testdag::task::Task;
use testdag::types::TaskCategory;

/// Builder for `Runnable` to simplify test setup.
pub struct RunnableBuilder {
    runnable: Runnable,
}

impl RunnableBuilder {
    pub fn new(kind: &str, uri: &str) -> Self {
        Self {
            runnable: Runnable::new(kind, Some(uri)),
        }
    }

    pub fn noop(uri: &str) -> Self {
        Self::new("noop", uri)
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.runnable.args.push(arg.to_string());
        self
    }

    pub fn kwarg(mut self, key: &str, value: Value) -> Self {
        self.runnable.kwargs.insert(key.to_string(), value);
        self
    }

    pub fn timeout_secs(self, secs: f64) -> Self {
        self.kwarg("timeout", json!(secs))
    }

    pub fn config(mut self, key: &str, value: Value) -> Self {
        self.runnable.config.insert(key.to_string(), value);
        self
    }

    pub fn tag(mut self, key: &str, values: &[&str]) -> Self {
        self.runnable.tags.insert(
            key.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn dependency(mut self, dep: Dependency) -> Self {
        self.runnable.dependencies.push(dep);
        self
    }

    pub fn depends_on(self, kind: &str, uri: &str) -> Self {
        self.dependency(Dependency::new(kind, Some(uri)))
    }

    pub fn build(self) -> Runnable {
        self.runnable
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    runnable: Runnable,
    identifier: Option<String>,
    job_id: String,
    category: TaskCategory,
    status_uris: Vec<String>,
}

impl TaskBuilder {
    pub fn new(runnable: Runnable) -> Self {
        Self {
            runnable,
            identifier: None,
            job_id: "test-job".to_string(),
            category: TaskCategory::Test,
            status_uris: Vec::new(),
        }
    }

    pub fn identifier(mut self, id: &str) -> Self {
        self.identifier = Some(id.to_string());
        self
    }

    pub fn job_id(mut self, job_id: &str) -> Self {
        self.job_id = job_id.to_string();
        self
    }

    pub fn category(mut self, category: TaskCategory) -> Self {
        self.category = category;
        self
    }

    pub fn status_uri(mut self, uri: &str) -> Self {
        self.status_uris.push(uri.to_string());
        self
    }

    pub fn build(self) -> Task {
        Task::new(
            self.runnable,
            self.identifier,
            self.status_uris,
            self.category,
            &self.job_id,
        )
    }
}
