// src/status/repo.rs

//! Append-only status repository.
//!
//! One journal per task id, plus two derived indexes: the latest message
//! per task and a by-result index for finished tasks. The repository is the
//! single source of truth for task observation; only the ingest consumer
//! mutates it.
//!
//! It tolerates duplicate and out-of-order delivery of `running` messages
//! (latest-status updates are time-monotonic), but a `finished` latest is
//! never displaced by a later `running` message.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::status::message::{Message, MessageStatus};
use crate::types::TaskResult;

#[derive(Debug)]
pub struct StatusRepo {
    job_id: String,
    /// Per-task message journal, in insertion order.
    all_data: HashMap<String, Vec<Message>>,
    /// Index of each task's latest message within its journal.
    latest: HashMap<String, usize>,
    /// Finished tasks grouped by result, in finish order.
    by_result: HashMap<TaskResult, Vec<String>>,
    /// First recorded terminal result per task.
    task_result: HashMap<String, TaskResult>,
}

impl StatusRepo {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            all_data: HashMap::new(),
            latest: HashMap::new(),
            by_result: HashMap::new(),
            task_result: HashMap::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Ingest one message.
    ///
    /// Invalid or mismatched messages are logged and discarded; this never
    /// fails the coordinator.
    pub fn process_message(&mut self, mut msg: Message) {
        let task_id = match &msg.id {
            Some(id) => id.clone(),
            None => {
                warn!("status message without 'id'; discarding");
                return;
            }
        };

        match &msg.job_id {
            Some(job_id) if *job_id == self.job_id => {}
            Some(job_id) => {
                debug!(
                    task = %task_id,
                    message_job_id = %job_id,
                    "status message for another job; discarding"
                );
                return;
            }
            None => {
                warn!(task = %task_id, "status message without 'job_id'; discarding");
                return;
            }
        }

        if msg.status == MessageStatus::Finished {
            self.normalize_result(&task_id, &mut msg);
            if let Some(result) = msg.result() {
                self.record_result(&task_id, result);
            }
        }

        // Update the latest index: strictly newer messages replace it,
        // equal-time messages only append, and a finished latest is never
        // displaced by a running message.
        let replace = match self.get_latest_task_data(&task_id) {
            None => true,
            Some(current) => {
                msg.time > current.time
                    && !(current.status == MessageStatus::Finished
                        && msg.status != MessageStatus::Finished)
            }
        };

        let journal = self.all_data.entry(task_id.clone()).or_default();
        journal.push(msg);
        if replace {
            let idx = journal.len() - 1;
            self.latest.insert(task_id, idx);
        }
    }

    /// Coerce unsupported `result` values to `error` with an audit record.
    fn normalize_result(&self, task_id: &str, msg: &mut Message) {
        let raw = msg.result_str().map(str::to_string);
        let supported = raw
            .as_deref()
            .map(|s| s.parse::<TaskResult>().is_ok())
            .unwrap_or(false);
        if supported {
            return;
        }

        let reason = match raw {
            Some(original) => format!("unsupported result '{original}' coerced to error"),
            None => "finished message without a result; coerced to error".to_string(),
        };
        warn!(task = %task_id, %reason, "coercing task result");
        msg.extra
            .insert("result".to_string(), Value::String("error".to_string()));
        msg.extra
            .insert("fail_reason".to_string(), Value::String(reason));
    }

    /// Record the terminal result of a task.
    ///
    /// Only the first `finished` message counts; replays and duplicates are
    /// ignored so that the aggregate stays stable.
    fn record_result(&mut self, task_id: &str, result: TaskResult) {
        if self.task_result.contains_key(task_id) {
            debug!(task = %task_id, "duplicate finished message; result already recorded");
            return;
        }
        self.task_result.insert(task_id.to_string(), result);
        self.by_result
            .entry(result)
            .or_default()
            .push(task_id.to_string());
    }

    /// Full journal for a task, in insertion order.
    pub fn get_task_data(&self, task_id: &str) -> Option<&[Message]> {
        self.all_data.get(task_id).map(Vec::as_slice)
    }

    /// Latest status message for a task.
    pub fn get_latest_task_data(&self, task_id: &str) -> Option<&Message> {
        let idx = *self.latest.get(task_id)?;
        self.all_data.get(task_id)?.get(idx)
    }

    /// Recorded terminal result for a task, if it finished.
    pub fn get_task_result(&self, task_id: &str) -> Option<TaskResult> {
        self.task_result.get(task_id).copied()
    }

    /// Count of finished tasks per result.
    pub fn result_stats(&self) -> BTreeMap<TaskResult, usize> {
        self.by_result
            .iter()
            .map(|(result, ids)| (*result, ids.len()))
            .collect()
    }

    /// Task ids that finished with the given result.
    pub fn get_tasks_with_result(&self, result: TaskResult) -> &[String] {
        self.by_result
            .get(&result)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Union of recorded results for the given set of tasks.
    ///
    /// Tasks without a recorded result contribute nothing; callers use the
    /// set size vs task count to detect unfinished dependencies.
    pub fn get_result_set_for_tasks<'a, I>(&self, task_ids: I) -> HashSet<TaskResult>
    where
        I: IntoIterator<Item = &'a str>,
    {
        task_ids
            .into_iter()
            .filter_map(|id| self.task_result.get(id).copied())
            .collect()
    }
}
