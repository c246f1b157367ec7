// src/registry.rs

//! Explicit runner registry.
//!
//! Maps runnable kinds to the spawn methods their runner supports and to a
//! way of obtaining the runner: an in-process factory for builtin kinds,
//! or a standalone executable command discovered by capability probing.
//!
//! Probing runs `<runner-prefix>-<kind> capabilities` and expects a JSON
//! document `{"runnables": [...], "commands": [...],
//! "configuration_used": [...]}` on stdout. Probe results, including
//! negative ones, are cached for the lifetime of the registry.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{Result, TestdagError};
use crate::runnable::model::{IDENTIFIER_FORMAT_KEY, STATUS_SERVER_URI_KEY};
use crate::runner::{ExecRunner, NoopRunner, Runner};
use crate::types::SpawnMethod;

/// Prefix for standalone runner executables: kind `foo` is reachable as
/// `testdag-runner-foo`.
pub const RUNNER_PREFIX: &str = "testdag-runner";

type RunnerFactory = fn() -> Box<dyn Runner>;

/// One registry entry: how runners for a kind may be spawned, and how to
/// obtain one.
pub struct RunnerEntry {
    pub spawn_methods: Vec<SpawnMethod>,
    factory: Option<RunnerFactory>,
    command: Option<Vec<String>>,
}

pub struct RunnerRegistry {
    entries: HashMap<String, RunnerEntry>,
    /// Probe cache: kind -> command, or None for a negative probe.
    probed: Mutex<HashMap<String, Option<Vec<String>>>>,
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            probed: Mutex::new(HashMap::new()),
        }
    }

    /// A registry pre-populated with the builtin runner kinds.
    pub fn with_builtin_runners() -> Self {
        let mut registry = Self::new();
        registry.register_builtin("noop", || Box::new(NoopRunner));
        registry.register_builtin("exec", || Box::new(ExecRunner::exec()));
        registry.register_builtin("exec-test", || Box::new(ExecRunner::exec_test()));
        registry
    }

    fn register_builtin(&mut self, kind: &str, factory: RunnerFactory) {
        self.entries.insert(
            kind.to_string(),
            RunnerEntry {
                spawn_methods: vec![SpawnMethod::Any],
                factory: Some(factory),
                command: None,
            },
        );
    }

    /// Register an external runner reachable by a concrete command.
    pub fn register_command(&mut self, kind: &str, command: Vec<String>) {
        self.entries.insert(
            kind.to_string(),
            RunnerEntry {
                spawn_methods: vec![SpawnMethod::StandaloneExecutable],
                factory: None,
                command: Some(command),
            },
        );
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_known(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Spawn methods declared for a kind, if known.
    pub fn spawn_methods(&self, kind: &str) -> Option<&[SpawnMethod]> {
        self.entries.get(kind).map(|e| e.spawn_methods.as_slice())
    }

    /// Whether a runner of this kind can be driven by a spawner declaring
    /// the given methods.
    pub fn supports_spawner(&self, kind: &str, spawner_methods: &[SpawnMethod]) -> bool {
        match self.spawn_methods(kind) {
            Some(methods) => methods
                .iter()
                .any(|m| spawner_methods.iter().any(|s| m.is_compatible(s))),
            None => false,
        }
    }

    /// Instantiate an in-process runner for a kind.
    pub fn pick_runner(&self, kind: &str) -> Result<Box<dyn Runner>> {
        self.entries
            .get(kind)
            .and_then(|e| e.factory)
            .map(|factory| factory())
            .ok_or_else(|| TestdagError::UnsupportedKind(kind.to_string()))
    }

    /// Resolve the command line for running a kind as a standalone
    /// executable.
    ///
    /// Registered commands win; builtin kinds fall back to the bundled
    /// `testdag-runner` binary; unknown kinds are capability-probed as
    /// `testdag-runner-<kind>`.
    pub async fn runner_command(&self, kind: &str) -> Result<Vec<String>> {
        if let Some(entry) = self.entries.get(kind) {
            if let Some(command) = &entry.command {
                return Ok(command.clone());
            }
            if entry.factory.is_some() {
                return Ok(vec![RUNNER_PREFIX.to_string()]);
            }
        }

        if let Some(cached) = self.probed.lock().ok().and_then(|p| p.get(kind).cloned()) {
            return cached.ok_or_else(|| TestdagError::UnsupportedKind(kind.to_string()));
        }

        let candidate = vec![format!("{RUNNER_PREFIX}-{kind}")];
        let supported = is_kind_supported_by_command(kind, &candidate).await;
        let probe = if supported {
            Some(candidate.clone())
        } else {
            None
        };
        if let Ok(mut probed) = self.probed.lock() {
            probed.insert(kind.to_string(), probe);
        }

        if supported {
            debug!(kind = %kind, command = ?candidate, "runner command probed");
            Ok(candidate)
        } else {
            Err(TestdagError::UnsupportedKind(kind.to_string()))
        }
    }

    /// The capabilities document for the bundled runner binary.
    pub fn capabilities(&self) -> Value {
        let mut runnables: Vec<&str> = self.kinds().collect();
        runnables.sort_unstable();
        json!({
            "runnables": runnables,
            "commands": ["capabilities", "task-run"],
            "configuration_used": [IDENTIFIER_FORMAT_KEY, STATUS_SERVER_URI_KEY],
        })
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::with_builtin_runners()
    }
}

/// Run `<command> capabilities` and check whether `kind` is declared.
pub async fn is_kind_supported_by_command(kind: &str, command: &[String]) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };
    let output = Command::new(program)
        .args(args)
        .arg("capabilities")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            debug!(command = ?command, error = %e, "capability probe failed to run");
            return false;
        }
    };

    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(caps) => caps
            .get("runnables")
            .and_then(Value::as_array)
            .map(|kinds| kinds.iter().any(|k| k.as_str() == Some(kind)))
            .unwrap_or(false),
        Err(e) => {
            warn!(command = ?command, error = %e, "capability probe produced malformed JSON");
            false
        }
    }
}
