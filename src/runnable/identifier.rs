// src/runnable/identifier.rs

//! Identifier format templates.
//!
//! A runnable's human-readable identifier is produced by applying a
//! user-supplied template to its `uri`, `args` and `kwargs`:
//!
//! - `{uri}`        — the URI (empty when absent)
//! - `{args}`       — all positional args joined with `-`
//! - `{args[1]}`    — one positional arg by zero-based index
//! - `{kwargs}`     — all kwarg string values joined with `-`
//! - `{kwargs[k]}`  — the value of one kwarg by key
//!
//! Placeholders that cannot be resolved render as an empty string rather
//! than failing: identifiers are cosmetic, uniqueness comes from the task.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::runnable::model::Runnable;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{(uri|args|kwargs)(?:\[([^\]]+)\])?\}").expect("static regex")
    })
}

/// Apply `template` to the given runnable.
pub fn format_identifier(template: &str, runnable: &Runnable) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let index = caps.get(2).map(|m| m.as_str());
            match &caps[1] {
                "uri" => runnable.uri.clone().unwrap_or_default(),
                "args" => match index {
                    Some(idx) => idx
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| runnable.args.get(i).cloned())
                        .unwrap_or_default(),
                    None => runnable.args.join("-"),
                },
                "kwargs" => match index {
                    Some(key) => runnable
                        .kwargs
                        .get(key)
                        .map(render_value)
                        .unwrap_or_default(),
                    None => runnable
                        .kwargs
                        .values()
                        .map(render_value)
                        .collect::<Vec<_>>()
                        .join("-"),
                },
                _ => String::new(),
            }
        })
        .into_owned()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
