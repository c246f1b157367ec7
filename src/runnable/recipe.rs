// src/runnable/recipe.rs

//! Recipe (de)serialization for runnables.
//!
//! A recipe is a JSON document with the keys `kind` (required), `uri`,
//! `args`, `kwargs`, `config`, `tags`, `dependencies`, `variant` and
//! `output_dir`. Set-valued tags serialize as sorted lists under the key
//! `__encoded_set__` so that round-tripping preserves set semantics.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

use crate::errors::{Result, TestdagError};
use crate::runnable::model::Runnable;

/// Key marking a JSON object as an encoded set.
pub const ENCODED_SET_KEY: &str = "__encoded_set__";

const BASE64_PREFIX: &str = "base64:";
const JSON_PREFIX: &str = "json:";

/// Decode an argument possibly wrapped as `base64:<b64>`.
pub fn arg_decode_base64(arg: &str) -> Result<String> {
    match arg.strip_prefix(BASE64_PREFIX) {
        Some(content) => {
            let bytes = BASE64
                .decode(content)
                .map_err(|e| TestdagError::Config(format!("invalid base64 argument: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| TestdagError::Config(format!("base64 argument is not UTF-8: {e}")))
        }
        None => Ok(arg.to_string()),
    }
}

/// Decode a keyword-argument value possibly prefixed with `json:`.
pub fn kwarg_decode_json(value: &str) -> Result<Value> {
    match value.strip_prefix(JSON_PREFIX) {
        Some(content) => serde_json::from_str(content)
            .map_err(|e| TestdagError::Config(format!("invalid json: kwarg value: {e}"))),
        None => Ok(Value::String(value.to_string())),
    }
}

/// Render the tag map with sets encoded as `{"__encoded_set__": [...]}`.
pub fn serializable_tags(tags: &BTreeMap<String, BTreeSet<String>>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, set) in tags {
        // BTreeSet iterates sorted, which keeps the encoding canonical.
        let values: Vec<Value> = set.iter().cloned().map(Value::String).collect();
        out.insert(key.clone(), json!({ ENCODED_SET_KEY: values }));
    }
    out
}

/// Parse a tag map, accepting both the encoded-set form and plain lists.
fn decode_tags(value: &Value) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let obj = value
        .as_object()
        .ok_or_else(|| TestdagError::Config("recipe tags must be an object".to_string()))?;

    let mut tags = BTreeMap::new();
    for (key, val) in obj {
        let items = match val {
            Value::Object(map) => map
                .get(ENCODED_SET_KEY)
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    TestdagError::Config(format!("tag '{key}' object is not an encoded set"))
                })?,
            Value::Array(items) => items,
            other => {
                return Err(TestdagError::Config(format!(
                    "tag '{key}' must be a list or encoded set, got {other}"
                )));
            }
        };
        let set: BTreeSet<String> = items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        tags.insert(key.clone(), set);
    }
    Ok(tags)
}

impl Runnable {
    /// Read a runnable from a recipe file.
    pub fn from_recipe(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_recipe_str(&contents)
    }

    /// Parse a runnable from a recipe JSON string.
    pub fn from_recipe_str(contents: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(contents)
            .map_err(|e| TestdagError::Config(format!("malformed recipe JSON: {e}")))?;
        Self::from_recipe_value(&doc)
    }

    /// Build a runnable from an already-parsed recipe document.
    pub fn from_recipe_value(doc: &Value) -> Result<Self> {
        let obj = doc
            .as_object()
            .ok_or_else(|| TestdagError::Config("recipe must be a JSON object".to_string()))?;

        let kind = obj
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| TestdagError::Config("recipe is missing 'kind'".to_string()))?;

        let mut runnable = Runnable::new(kind, obj.get("uri").and_then(Value::as_str));

        if let Some(args) = obj.get("args").and_then(Value::as_array) {
            runnable.args = args
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(kwargs) = obj.get("kwargs").and_then(Value::as_object) {
            runnable.kwargs = kwargs.clone();
        }
        if let Some(config) = obj.get("config").and_then(Value::as_object) {
            runnable.config = config.clone();
        }
        if let Some(tags) = obj.get("tags") {
            runnable.tags = decode_tags(tags)?;
        }
        if let Some(deps) = obj.get("dependencies") {
            runnable.dependencies = serde_json::from_value(deps.clone())
                .map_err(|e| TestdagError::Config(format!("malformed dependencies: {e}")))?;
        }
        if let Some(variant) = obj.get("variant") {
            if !variant.is_null() {
                runnable.variant = Some(variant.clone());
            }
        }
        if let Some(dir) = obj.get("output_dir").and_then(Value::as_str) {
            runnable.output_dir = Some(dir.to_string());
        }

        Ok(runnable)
    }

    /// Build a runnable from parsed command-line pieces (the worker side of
    /// the `task-run` interface).
    ///
    /// - positional args prefixed `base64:` are decoded to strings
    /// - kwarg values prefixed `json:` are JSON-parsed
    /// - the reserved kwargs `tags`, `variant` and `output_dir` populate the
    ///   corresponding runnable attributes
    pub fn from_args(
        kind: &str,
        uri: Option<&str>,
        args: &[String],
        config_json: Option<&str>,
        kwargs: &[(String, String)],
    ) -> Result<Self> {
        let mut runnable = Runnable::new(kind, uri);

        runnable.args = args
            .iter()
            .map(|a| arg_decode_base64(a))
            .collect::<Result<Vec<_>>>()?;

        if let Some(config) = config_json {
            let parsed: Value = serde_json::from_str(config)
                .map_err(|e| TestdagError::Config(format!("malformed config JSON: {e}")))?;
            runnable.config = parsed
                .as_object()
                .cloned()
                .ok_or_else(|| TestdagError::Config("config must be a JSON object".to_string()))?;
        }

        for (key, raw) in kwargs {
            let value = kwarg_decode_json(raw)?;
            match key.as_str() {
                "tags" => runnable.tags = decode_tags(&value)?,
                "variant" => runnable.variant = Some(value),
                "output_dir" => {
                    runnable.output_dir = value.as_str().map(str::to_string);
                }
                _ => {
                    runnable.kwargs.insert(key.clone(), value);
                }
            }
        }

        Ok(runnable)
    }

    /// Canonical dictionary representation, suitable for serialization.
    pub fn get_dict(&self) -> Map<String, Value> {
        let mut recipe = Map::new();
        recipe.insert("kind".to_string(), Value::String(self.kind.clone()));
        if let Some(uri) = &self.uri {
            recipe.insert("uri".to_string(), Value::String(uri.clone()));
        }
        if !self.args.is_empty() {
            recipe.insert(
                "args".to_string(),
                Value::Array(self.args.iter().cloned().map(Value::String).collect()),
            );
        }
        if !self.kwargs.is_empty() {
            recipe.insert("kwargs".to_string(), Value::Object(self.kwargs.clone()));
        }
        if !self.config.is_empty() {
            recipe.insert("config".to_string(), Value::Object(self.config.clone()));
        }
        if !self.tags.is_empty() {
            recipe.insert(
                "tags".to_string(),
                Value::Object(serializable_tags(&self.tags)),
            );
        }
        if !self.dependencies.is_empty() {
            recipe.insert(
                "dependencies".to_string(),
                serde_json::to_value(&self.dependencies).unwrap_or(Value::Null),
            );
        }
        if let Some(variant) = &self.variant {
            recipe.insert("variant".to_string(), variant.clone());
        }
        if let Some(dir) = &self.output_dir {
            recipe.insert("output_dir".to_string(), Value::String(dir.clone()));
        }
        recipe
    }

    /// JSON representation of [`Runnable::get_dict`].
    pub fn get_json(&self) -> String {
        Value::Object(self.get_dict()).to_string()
    }

    /// Write the JSON representation (a recipe) to a file.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.get_json())?;
        Ok(())
    }
}

/// Parse a `key=value` pair from the worker command line.
pub fn split_key_val(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(TestdagError::Config(format!(
            "expected key=value argument, got '{raw}'"
        ))),
    }
}
