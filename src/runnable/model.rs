// src/runnable/model.rs

//! The [`Runnable`] and [`Dependency`] value types.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};

use crate::runnable::identifier::format_identifier;
use crate::runnable::recipe;

/// Config key that selects the identifier format template.
pub const IDENTIFIER_FORMAT_KEY: &str = "runner.identifier_format";

/// Config key naming the default status server URI for tasks built from
/// this runnable.
pub const STATUS_SERVER_URI_KEY: &str = "nrunner.status_server_uri";

/// Another runnable that must finish with a satisfying result before the
/// dependent task can start.
///
/// The taxonomy of kinds is open; common kinds include `package`, `asset`
/// and `podman-image`. Equality and hash are structural, so two dependency
/// records that describe the same work deduplicate to one runtime task.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Dependency {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.uri.hash(state);
        self.args.hash(state);
        // serde_json's map is ordered, so the rendering is canonical.
        for (k, v) in &self.kwargs {
            k.hash(state);
            v.to_string().hash(state);
        }
    }
}

impl Dependency {
    pub fn new(kind: &str, uri: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            uri: uri.map(str::to_string),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Expand this dependency into a runnable of its own kind, so it can
    /// become a `pre_test` runtime task in the job graph.
    pub fn to_runnable(&self, config: Map<String, Value>) -> Runnable {
        let mut runnable = Runnable::new(&self.kind, self.uri.as_deref());
        runnable.args = self.args.clone();
        runnable.kwargs = self.kwargs.clone();
        runnable.config = config;
        runnable
    }
}

/// Immutable description of a unit of work.
///
/// A runnable says *what* to run; a runner for its `kind` knows *how*.
/// Everything needed to re-create the execution elsewhere (another process,
/// a container) is carried here and is serializable as a recipe.
#[derive(Debug, Clone, Default)]
pub struct Runnable {
    /// Selects which runner handles this runnable.
    pub kind: String,
    /// Runner-specific locator (a path, an URI, or nothing at all).
    pub uri: Option<String>,
    /// Positional arguments passed to the runner.
    pub args: Vec<String>,
    /// Keyword arguments; values may be strings, numbers, booleans or
    /// nested containers.
    pub kwargs: Map<String, Value>,
    /// Snapshot of the runtime configuration the runner may consult.
    pub config: Map<String, Value>,
    /// Free-form tags; values are sets of strings.
    pub tags: BTreeMap<String, BTreeSet<String>>,
    /// Dependencies that become their own runtime tasks in the job graph.
    pub dependencies: Vec<Dependency>,
    /// Optional parameter-variant payload.
    pub variant: Option<Value>,
    /// Output directory, assigned late by the coordinator.
    pub output_dir: Option<String>,
}

impl Runnable {
    pub fn new(kind: &str, uri: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            uri: uri.map(str::to_string),
            ..Default::default()
        }
    }

    /// Content-hash identity over (kind, uri, sorted args, sorted kwargs).
    ///
    /// Two runnables with the same identity describe the same work; tags,
    /// config and dependencies do not participate.
    pub fn identity(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind.as_bytes());
        hasher.update(b"\0");
        if let Some(uri) = &self.uri {
            hasher.update(uri.as_bytes());
        }
        hasher.update(b"\0");

        let mut args = self.args.clone();
        args.sort();
        for arg in &args {
            hasher.update(arg.as_bytes());
            hasher.update(b"\0");
        }

        // serde_json's map iterates in sorted key order.
        for (key, val) in &self.kwargs {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(val.to_string().as_bytes());
            hasher.update(b"\0");
        }

        hasher.finalize().to_hex().to_string()
    }

    /// Human-readable identifier derived from the configured format
    /// template (`runner.identifier_format`, default `{uri}`).
    pub fn identifier(&self) -> String {
        let template = self
            .config
            .get(IDENTIFIER_FORMAT_KEY)
            .and_then(Value::as_str)
            .unwrap_or("{uri}");
        format_identifier(template, self)
    }

    /// Default status server URI carried in the config snapshot, if any.
    pub fn status_server_uri(&self) -> Option<String> {
        self.config
            .get(STATUS_SERVER_URI_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Render this runnable as the argument vector of the standalone worker
    /// interface (the `task-run` subcommand).
    ///
    /// Argument values starting with `-` are wrapped as `base64:<b64>` to
    /// avoid flag ambiguity on the receiving side.
    pub fn get_command_args(&self) -> Vec<String> {
        let mut out = vec!["-k".to_string(), self.kind.clone()];

        if let Some(uri) = &self.uri {
            out.push("-u".to_string());
            out.push(uri.clone());
        }

        if !self.config.is_empty() {
            out.push("-c".to_string());
            out.push(Value::Object(self.config.clone()).to_string());
        }

        for arg in &self.args {
            out.push("-a".to_string());
            if arg.starts_with('-') {
                out.push(format!("base64:{}", BASE64.encode(arg.as_bytes())));
            } else {
                out.push(arg.clone());
            }
        }

        if !self.tags.is_empty() {
            let tags = recipe::serializable_tags(&self.tags);
            out.push(format!("tags=json:{}", Value::Object(tags)));
        }

        if let Some(variant) = &self.variant {
            out.push(format!("variant=json:{variant}"));
        }

        if let Some(dir) = &self.output_dir {
            out.push(format!("output_dir={dir}"));
        }

        for (key, val) in &self.kwargs {
            match val {
                Value::String(s) => out.push(format!("{key}={s}")),
                other => out.push(format!("{key}=json:{other}")),
            }
        }

        out
    }
}
