//! Task construction, recipes and output directories.

use serde_json::json;

use testdag::task::{fs_safe_identifier, Task};
use testdag::types::TaskCategory;
use testdag_test_utils::builders::RunnableBuilder;

#[test]
fn task_gets_a_generated_identifier_when_none_is_given() {
    let a = Task::new(
        RunnableBuilder::noop("/t/one").build(),
        None,
        vec![],
        TaskCategory::Test,
        "job",
    );
    let b = Task::new(
        RunnableBuilder::noop("/t/one").build(),
        None,
        vec![],
        TaskCategory::Test,
        "job",
    );
    assert!(!a.identifier.is_empty());
    assert_ne!(a.identifier, b.identifier);
}

#[test]
fn status_uris_fall_back_to_the_runnable_config() {
    let runnable = RunnableBuilder::noop("/t/one")
        .config("nrunner.status_server_uri", json!("127.0.0.1:8888"))
        .build();
    let task = Task::new(runnable, None, vec![], TaskCategory::Test, "job");
    assert_eq!(task.status_uris, ["127.0.0.1:8888"]);

    // explicit URIs win over the config fallback
    let runnable = RunnableBuilder::noop("/t/one")
        .config("nrunner.status_server_uri", json!("127.0.0.1:8888"))
        .build();
    let task = Task::new(
        runnable,
        None,
        vec!["127.0.0.1:9999".to_string()],
        TaskCategory::Test,
        "job",
    );
    assert_eq!(task.status_uris, ["127.0.0.1:9999"]);
}

#[test]
fn task_recipe_normalizes_a_single_status_uri() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("task.json");
    std::fs::write(
        &path,
        r#"{
            "id": "t-1",
            "job_id": "job",
            "category": "pre_test",
            "status_uris": "127.0.0.1:7777",
            "runnable": {"kind": "noop", "uri": "/t/one"}
        }"#,
    )
    .unwrap();

    let task = Task::from_recipe(&path).unwrap();
    assert_eq!(task.identifier, "t-1");
    assert_eq!(task.job_id, "job");
    assert_eq!(task.category, TaskCategory::PreTest);
    assert_eq!(task.status_uris, ["127.0.0.1:7777"]);
    assert_eq!(task.runnable.kind, "noop");
}

#[test]
fn malformed_task_recipe_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("task.json");
    std::fs::write(&path, r#"{"id": "t-1"}"#).unwrap();
    let err = Task::from_recipe(&path).unwrap_err();
    assert!(matches!(err, testdag::TestdagError::Config(_)));
}

#[test]
fn setup_output_dir_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = Task::new(
        RunnableBuilder::noop("/t/weird name/!").build(),
        Some("1-/t/weird name/!".to_string()),
        vec![],
        TaskCategory::Test,
        "job",
    );

    let first = task.setup_output_dir(dir.path()).unwrap();
    assert!(first.is_dir());
    let second = task.setup_output_dir(dir.path()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn fs_safe_identifier_replaces_special_characters() {
    assert_eq!(fs_safe_identifier("1-/t/a b"), "1-_t_a_b");
    assert_eq!(fs_safe_identifier("plain-name_1.log"), "plain-name_1.log");
}

#[test]
fn command_args_carry_identity_and_endpoints() {
    let task = Task::new(
        RunnableBuilder::noop("/t/one").build(),
        Some("t-1".to_string()),
        vec!["127.0.0.1:7777".to_string()],
        TaskCategory::Test,
        "job",
    );
    let args = task.get_command_args();
    let joined = args.join(" ");
    assert!(joined.starts_with("-i t-1 -j job"));
    assert!(joined.contains("-k noop"));
    assert!(joined.contains("-s 127.0.0.1:7777"));
    assert!(joined.ends_with("-t test"));
}
