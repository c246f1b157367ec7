// src/status/message.rs

//! Wire schema for status messages.
//!
//! Every message carries a `status` discriminator and a monotonic `time`;
//! after augmentation by the emitting task, `id` and `job_id` are also
//! mandatory. Everything else lives in a flattened extra payload so that
//! unknown fields from newer workers never break decoding.

use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::types::TaskResult;

/// Key wrapping binary payloads during JSON transport.
pub const BASE64_ENCODED_KEY: &str = "__base64_encoded__";

/// Stream sub-types carried on `running` messages.
pub const RUNNING_TYPES: &[&str] = &["stdout", "stderr", "log", "output", "whiteboard", "file"];

/// The `status` discriminator of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Worker has begun; emitted exactly once per task.
    Started,
    /// Liveness heartbeat or a streamed log chunk.
    Running,
    /// Terminal; carries the task result.
    Finished,
}

/// One status record exchanged between a worker and the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub status: MessageStatus,
    /// Monotonic seconds within the emitting process.
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Monotonic seconds since this process first produced a message.
pub fn monotonic_secs() -> f64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Wrap binary data for JSON transport.
pub fn encode_bytes(data: &[u8]) -> Value {
    json!({ BASE64_ENCODED_KEY: BASE64.encode(data) })
}

/// Unwrap a possibly base64-wrapped payload.
///
/// Plain strings pass through as their UTF-8 bytes.
pub fn decode_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.clone().into_bytes()),
        Value::Object(map) => {
            let encoded = map.get(BASE64_ENCODED_KEY)?.as_str()?;
            BASE64.decode(encoded).ok()
        }
        _ => None,
    }
}

impl Message {
    pub fn started() -> Self {
        Self::bare(MessageStatus::Started)
    }

    pub fn running() -> Self {
        Self::bare(MessageStatus::Running)
    }

    /// A `running` message carrying one streamed log chunk.
    pub fn running_log(stream_type: &str, log: &[u8]) -> Self {
        let mut msg = Self::bare(MessageStatus::Running);
        msg.extra
            .insert("type".to_string(), Value::String(stream_type.to_string()));
        msg.extra.insert("log".to_string(), encode_bytes(log));
        msg
    }

    pub fn finished(result: TaskResult) -> Self {
        let mut msg = Self::bare(MessageStatus::Finished);
        msg.extra.insert(
            "result".to_string(),
            Value::String(result.as_str().to_string()),
        );
        msg
    }

    fn bare(status: MessageStatus) -> Self {
        Self {
            status,
            time: monotonic_secs(),
            id: None,
            job_id: None,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn with_fail_reason(self, reason: &str) -> Self {
        self.with_extra("fail_reason", Value::String(reason.to_string()))
    }

    pub fn with_returncode(self, code: i32) -> Self {
        self.with_extra("returncode", json!(code))
    }

    /// The raw `result` string of a `finished` message.
    pub fn result_str(&self) -> Option<&str> {
        self.extra.get("result").and_then(Value::as_str)
    }

    /// The parsed result, if it belongs to the supported set.
    pub fn result(&self) -> Option<TaskResult> {
        self.result_str().and_then(|s| TaskResult::from_str(s).ok())
    }

    pub fn fail_reason(&self) -> Option<&str> {
        self.extra.get("fail_reason").and_then(Value::as_str)
    }

    pub fn output_dir(&self) -> Option<&str> {
        self.extra.get("output_dir").and_then(Value::as_str)
    }

    /// The stream sub-type of a `running` message, if any.
    pub fn stream_type(&self) -> Option<&str> {
        self.extra.get("type").and_then(Value::as_str)
    }

    /// The decoded log payload of a `running` message, if any.
    pub fn log_bytes(&self) -> Option<Vec<u8>> {
        self.extra.get("log").and_then(decode_bytes)
    }

    /// Relative path of a `file` message.
    pub fn file_path(&self) -> Option<&str> {
        self.extra.get("path").and_then(Value::as_str)
    }

    /// Serialize as one line of the wire protocol (no trailing newline).
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("message serialization is infallible")
    }
}
