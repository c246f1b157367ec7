//! Builtin runners driven through the in-process task execution path.

use tokio::sync::mpsc;

use testdag::registry::RunnerRegistry;
use testdag::status::{Message, MessageStatus};
use testdag::types::TaskResult;
use testdag_test_utils::builders::{RunnableBuilder, TaskBuilder};
use testdag_test_utils::{init_tracing, with_timeout};

async fn run_task(task: &mut testdag::Task) -> Vec<Message> {
    let registry = RunnerRegistry::with_builtin_runners();
    let (tx, mut rx) = mpsc::channel(64);
    task.run(&registry, tx).await.unwrap();
    let mut messages = Vec::new();
    while let Some(msg) = rx.recv().await {
        messages.push(msg);
    }
    messages
}

#[tokio::test]
async fn noop_reports_started_then_pass() {
    init_tracing();
    with_timeout(async {
        let mut task = TaskBuilder::new(RunnableBuilder::noop("/t/one").build())
            .identifier("noop-1")
            .job_id("job")
            .build();
        let messages = run_task(&mut task).await;

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].status, MessageStatus::Started);
        assert_eq!(messages[1].status, MessageStatus::Finished);
        assert_eq!(messages[1].result(), Some(TaskResult::Pass));
        // augmentation stamped identity on every message
        for msg in &messages {
            assert_eq!(msg.id.as_deref(), Some("noop-1"));
            assert_eq!(msg.job_id.as_deref(), Some("job"));
        }
        assert!(messages[0].output_dir().is_some());
    })
    .await;
}

#[tokio::test]
async fn exec_test_maps_nonzero_exit_to_fail() {
    init_tracing();
    with_timeout(async {
        let mut task = TaskBuilder::new(RunnableBuilder::new("exec-test", "/bin/false").build())
            .identifier("false-1")
            .build();
        let messages = run_task(&mut task).await;

        let finished = messages.last().unwrap();
        assert_eq!(finished.result(), Some(TaskResult::Fail));
        assert_eq!(finished.extra["returncode"], serde_json::json!(1));
    })
    .await;
}

#[tokio::test]
async fn exec_maps_nonzero_exit_to_error() {
    init_tracing();
    with_timeout(async {
        let mut task = TaskBuilder::new(RunnableBuilder::new("exec", "/bin/false").build())
            .identifier("false-2")
            .build();
        let messages = run_task(&mut task).await;
        assert_eq!(messages.last().unwrap().result(), Some(TaskResult::Error));
    })
    .await;
}

#[tokio::test]
async fn exec_streams_stdout() {
    init_tracing();
    with_timeout(async {
        let mut task = TaskBuilder::new(
            RunnableBuilder::new("exec-test", "/bin/echo").arg("hello world").build(),
        )
        .identifier("echo-1")
        .build();
        let messages = run_task(&mut task).await;

        let stdout: Vec<u8> = messages
            .iter()
            .filter(|m| m.stream_type() == Some("stdout"))
            .filter_map(|m| m.log_bytes())
            .flatten()
            .collect();
        assert_eq!(stdout, b"hello world\n");
        assert_eq!(messages.last().unwrap().result(), Some(TaskResult::Pass));
    })
    .await;
}

#[tokio::test]
async fn exec_env_comes_from_string_kwargs() {
    init_tracing();
    with_timeout(async {
        let mut task = TaskBuilder::new(
            RunnableBuilder::new("exec-test", "/bin/sh")
                .arg("-c")
                .arg("echo $GREETING")
                .kwarg("GREETING", serde_json::json!("hi"))
                .build(),
        )
        .identifier("env-1")
        .build();
        let messages = run_task(&mut task).await;

        let stdout: Vec<u8> = messages
            .iter()
            .filter(|m| m.stream_type() == Some("stdout"))
            .filter_map(|m| m.log_bytes())
            .flatten()
            .collect();
        assert_eq!(stdout, b"hi\n");
    })
    .await;
}

#[tokio::test]
async fn missing_executable_finishes_with_error_not_panic() {
    init_tracing();
    with_timeout(async {
        let mut task = TaskBuilder::new(
            RunnableBuilder::new("exec", "/no/such/binary/anywhere").build(),
        )
        .identifier("missing-1")
        .build();
        let messages = run_task(&mut task).await;

        let finished = messages.last().unwrap();
        assert_eq!(finished.status, MessageStatus::Finished);
        assert_eq!(finished.result(), Some(TaskResult::Error));
        assert!(finished.fail_reason().unwrap().contains("failed to execute"));
    })
    .await;
}

#[tokio::test]
async fn unknown_kind_is_rejected() {
    let registry = RunnerRegistry::with_builtin_runners();
    assert!(matches!(
        registry.pick_runner("no-such-kind"),
        Err(testdag::TestdagError::UnsupportedKind(_))
    ));
}

#[test]
fn capabilities_list_builtin_kinds() {
    let registry = RunnerRegistry::with_builtin_runners();
    let caps = registry.capabilities();
    let kinds: Vec<&str> = caps["runnables"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(kinds, ["exec", "exec-test", "noop"]);
    assert!(caps["commands"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "task-run"));
}
