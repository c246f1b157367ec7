//! Status repository invariants: finished-once, monotonic latest, result
//! coercion and replay idempotence.

use serde_json::{json, Value};

use testdag::status::{Message, MessageStatus, StatusRepo};
use testdag::types::TaskResult;
use testdag_test_utils::init_tracing;

fn msg(status: MessageStatus, time: f64, id: &str, job: &str) -> Message {
    let mut m = match status {
        MessageStatus::Started => Message::started(),
        MessageStatus::Running => Message::running(),
        MessageStatus::Finished => Message::finished(TaskResult::Pass),
    };
    m.time = time;
    m.id = Some(id.to_string());
    m.job_id = Some(job.to_string());
    m
}

#[test]
fn first_finished_result_wins() {
    init_tracing();
    let mut repo = StatusRepo::new("job");
    let mut first = msg(MessageStatus::Finished, 1.0, "t1", "job");
    first.extra.insert("result".to_string(), json!("fail"));
    repo.process_message(first);

    let replay = msg(MessageStatus::Finished, 2.0, "t1", "job");
    repo.process_message(replay);

    assert_eq!(repo.get_task_result("t1"), Some(TaskResult::Fail));
    assert_eq!(repo.get_tasks_with_result(TaskResult::Fail), ["t1"]);
    assert!(repo.get_tasks_with_result(TaskResult::Pass).is_empty());
    // both messages remain in the journal
    assert_eq!(repo.get_task_data("t1").unwrap().len(), 2);
}

#[test]
fn finished_latest_survives_late_running() {
    let mut repo = StatusRepo::new("job");
    repo.process_message(msg(MessageStatus::Started, 1.0, "t1", "job"));
    repo.process_message(msg(MessageStatus::Finished, 2.0, "t1", "job"));
    // a straggler heartbeat delivered after the finish
    repo.process_message(msg(MessageStatus::Running, 3.0, "t1", "job"));

    let latest = repo.get_latest_task_data("t1").unwrap();
    assert_eq!(latest.status, MessageStatus::Finished);
}

#[test]
fn latest_is_time_monotonic() {
    let mut repo = StatusRepo::new("job");
    repo.process_message(msg(MessageStatus::Running, 5.0, "t1", "job"));
    // out-of-order older message appends but does not replace
    repo.process_message(msg(MessageStatus::Started, 1.0, "t1", "job"));

    let latest = repo.get_latest_task_data("t1").unwrap();
    assert_eq!(latest.status, MessageStatus::Running);
    assert_eq!(repo.get_task_data("t1").unwrap().len(), 2);
}

#[test]
fn unsupported_result_is_coerced_to_error_with_audit() {
    let mut repo = StatusRepo::new("job");
    let mut finished = msg(MessageStatus::Finished, 1.0, "t1", "job");
    finished
        .extra
        .insert("result".to_string(), json!("exploded"));
    repo.process_message(finished);

    assert_eq!(repo.get_task_result("t1"), Some(TaskResult::Error));
    let latest = repo.get_latest_task_data("t1").unwrap();
    assert!(latest.fail_reason().unwrap().contains("exploded"));
}

#[test]
fn finished_without_result_is_coerced_to_error() {
    let mut repo = StatusRepo::new("job");
    let mut finished = msg(MessageStatus::Finished, 1.0, "t1", "job");
    finished.extra.remove("result");
    repo.process_message(finished);
    assert_eq!(repo.get_task_result("t1"), Some(TaskResult::Error));
}

#[test]
fn messages_for_other_jobs_are_dropped() {
    let mut repo = StatusRepo::new("job-a");
    repo.process_message(msg(MessageStatus::Started, 1.0, "t1", "job-b"));
    assert!(repo.get_task_data("t1").is_none());
}

#[test]
fn messages_without_id_or_job_id_are_dropped() {
    let mut repo = StatusRepo::new("job");
    let mut no_id = Message::started();
    no_id.job_id = Some("job".to_string());
    repo.process_message(no_id);

    let mut no_job = Message::started();
    no_job.id = Some("t1".to_string());
    repo.process_message(no_job);

    assert!(repo.get_task_data("t1").is_none());
}

#[test]
fn result_stats_count_per_result() {
    let mut repo = StatusRepo::new("job");
    for (id, result) in [("t1", "pass"), ("t2", "pass"), ("t3", "fail"), ("t4", "skip")] {
        let mut finished = msg(MessageStatus::Finished, 1.0, id, "job");
        finished
            .extra
            .insert("result".to_string(), Value::String(result.to_string()));
        repo.process_message(finished);
    }
    let stats = repo.result_stats();
    assert_eq!(stats[&TaskResult::Pass], 2);
    assert_eq!(stats[&TaskResult::Fail], 1);
    assert_eq!(stats[&TaskResult::Skip], 1);

    let set = repo.get_result_set_for_tasks(["t1", "t3"].into_iter());
    assert_eq!(set.len(), 2);
    assert!(set.contains(&TaskResult::Pass) && set.contains(&TaskResult::Fail));
}

#[test]
fn binary_log_payloads_round_trip() {
    use testdag::status::message::{decode_bytes, encode_bytes};

    let payload: Vec<u8> = vec![0x00, 0xff, 0x10, b'x'];
    let wrapped = encode_bytes(&payload);
    assert_eq!(decode_bytes(&wrapped).unwrap(), payload);

    let running = Message::running_log("stdout", &payload);
    assert_eq!(running.stream_type(), Some("stdout"));
    assert_eq!(running.log_bytes().unwrap(), payload);

    // plain strings pass through
    assert_eq!(decode_bytes(&json!("hello")).unwrap(), b"hello");
}

#[test]
fn wire_round_trip_keeps_unknown_fields() {
    let mut original = msg(MessageStatus::Running, 1.5, "t1", "job");
    original
        .extra
        .insert("from_the_future".to_string(), json!({"v": 2}));
    let parsed: Message = serde_json::from_str(&original.to_wire()).unwrap();
    assert_eq!(parsed.extra["from_the_future"], json!({"v": 2}));
    assert_eq!(parsed.id.as_deref(), Some("t1"));
}
