//! Runnable recipes, identifiers and the worker command-line rendering.

use serde_json::json;

use testdag::runnable::recipe::split_key_val;
use testdag::runnable::{Dependency, Runnable};
use testdag_test_utils::builders::RunnableBuilder;
use testdag_test_utils::init_tracing;

#[test]
fn recipe_round_trip_preserves_everything() {
    init_tracing();
    let original = RunnableBuilder::new("exec-test", "/bin/sleep")
        .arg("1")
        .kwarg("timeout", json!(30.5))
        .kwarg("env", json!({"LANG": "C"}))
        .config("runner.identifier_format", json!("{uri}-{args[0]}"))
        .tag("arch", &["x86_64", "aarch64"])
        .depends_on("package", "gcc")
        .build();

    let parsed = Runnable::from_recipe_str(&original.get_json()).unwrap();
    assert_eq!(parsed.kind, original.kind);
    assert_eq!(parsed.uri, original.uri);
    assert_eq!(parsed.args, original.args);
    assert_eq!(parsed.kwargs, original.kwargs);
    assert_eq!(parsed.config, original.config);
    assert_eq!(parsed.tags, original.tags);
    assert_eq!(parsed.dependencies, original.dependencies);
}

#[test]
fn tags_round_trip_as_sets() {
    let runnable = RunnableBuilder::noop("/t/one")
        .tag("slow", &["yes"])
        .tag("arch", &["x86_64", "x86_64", "aarch64"])
        .build();

    let json = runnable.get_json();
    // encoded-set wrapper present on the wire
    assert!(json.contains("__encoded_set__"));

    let parsed = Runnable::from_recipe_str(&json).unwrap();
    let arch = &parsed.tags["arch"];
    assert_eq!(arch.len(), 2);
    assert!(arch.contains("x86_64") && arch.contains("aarch64"));
}

#[test]
fn plain_list_tags_are_accepted() {
    let recipe = r#"{"kind": "noop", "uri": "/t/one", "tags": {"arch": ["x86_64"]}}"#;
    let parsed = Runnable::from_recipe_str(recipe).unwrap();
    assert!(parsed.tags["arch"].contains("x86_64"));
}

#[test]
fn missing_kind_is_a_config_error() {
    let err = Runnable::from_recipe_str(r#"{"uri": "/t/one"}"#).unwrap_err();
    assert!(matches!(err, testdag::TestdagError::Config(_)));
}

#[test]
fn command_args_round_trip_through_from_args() {
    let runnable = RunnableBuilder::new("exec", "/bin/ls")
        .arg("-la")
        .arg("/tmp")
        .kwarg("timeout", json!(5.0))
        .kwarg("shell", json!("sh"))
        .build();

    let rendered = runnable.get_command_args();
    // a leading-dash arg must be shielded
    assert!(rendered.iter().any(|a| a.starts_with("base64:")));
    assert!(!rendered.contains(&"-la".to_string()));

    // split the rendered vector back into the from_args inputs
    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    let mut uri = None;
    let mut kind = String::new();
    let mut config = None;
    let mut it = rendered.into_iter();
    while let Some(piece) = it.next() {
        match piece.as_str() {
            "-k" => kind = it.next().unwrap(),
            "-u" => uri = Some(it.next().unwrap()),
            "-c" => config = Some(it.next().unwrap()),
            "-a" => args.push(it.next().unwrap()),
            other => kwargs.push(split_key_val(other).unwrap()),
        }
    }

    let rebuilt =
        Runnable::from_args(&kind, uri.as_deref(), &args, config.as_deref(), &kwargs).unwrap();
    assert_eq!(rebuilt.kind, runnable.kind);
    assert_eq!(rebuilt.uri, runnable.uri);
    assert_eq!(rebuilt.args, runnable.args);
    assert_eq!(rebuilt.kwargs, runnable.kwargs);
}

#[test]
fn reserved_kwargs_populate_attributes() {
    let kwargs = vec![
        ("tags".to_string(), r#"json:{"arch": ["x86_64"]}"#.to_string()),
        ("variant".to_string(), r#"json:{"id": "v1"}"#.to_string()),
        ("output_dir".to_string(), "/tmp/out".to_string()),
        ("plain".to_string(), "value".to_string()),
    ];
    let runnable = Runnable::from_args("noop", Some("/t/one"), &[], None, &kwargs).unwrap();
    assert!(runnable.tags["arch"].contains("x86_64"));
    assert_eq!(runnable.variant, Some(json!({"id": "v1"})));
    assert_eq!(runnable.output_dir.as_deref(), Some("/tmp/out"));
    assert_eq!(runnable.kwargs["plain"], json!("value"));
    assert!(!runnable.kwargs.contains_key("tags"));
}

#[test]
fn identifier_follows_the_configured_template() {
    let runnable = RunnableBuilder::new("exec", "/bin/sleep")
        .arg("3")
        .kwarg("label", json!("smoke"))
        .config("runner.identifier_format", json!("{uri}-{args[0]}-{kwargs[label]}"))
        .build();
    assert_eq!(runnable.identifier(), "/bin/sleep-3-smoke");

    let plain = RunnableBuilder::noop("/t/one").build();
    assert_eq!(plain.identifier(), "/t/one");
}

#[test]
fn unresolvable_placeholders_render_empty() {
    let runnable = RunnableBuilder::noop("/t/one")
        .config("runner.identifier_format", json!("{uri}:{args[7]}:{kwargs[missing]}"))
        .build();
    assert_eq!(runnable.identifier(), "/t/one::");
}

#[test]
fn identity_ignores_arg_order_but_not_content() {
    let a = RunnableBuilder::new("exec", "/bin/true").arg("x").arg("y").build();
    let b = RunnableBuilder::new("exec", "/bin/true").arg("y").arg("x").build();
    let c = RunnableBuilder::new("exec", "/bin/true").arg("z").build();
    assert_eq!(a.identity(), b.identity());
    assert_ne!(a.identity(), c.identity());
}

#[test]
fn dependency_expands_into_its_own_runnable() {
    let mut dep = Dependency::new("package", Some("gcc"));
    dep.kwargs.insert("version".to_string(), json!("13"));
    let runnable = dep.to_runnable(serde_json::Map::new());
    assert_eq!(runnable.kind, "package");
    assert_eq!(runnable.uri.as_deref(), Some("gcc"));
    assert_eq!(runnable.kwargs["version"], json!("13"));
}
