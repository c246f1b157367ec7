//! Property tests for the graph linearization and the status repository.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use testdag::dag::TaskGraphBuilder;
use testdag::runnable::Runnable;
use testdag::status::{Message, MessageStatus, StatusRepo};
use testdag::types::TaskResult;

/// Dependency lists where task `i` may only depend on tasks `0..i`, which
/// keeps the generated graph acyclic by construction.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(move |raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, deps)| {
                    let valid: HashSet<usize> =
                        deps.into_iter().filter(|_| i > 0).map(|d| d % i).collect();
                    valid.into_iter().collect()
                })
                .collect()
        })
    })
}

proptest! {
    #[test]
    fn topological_order_respects_every_edge(deps in dag_strategy(12)) {
        let mut builder = TaskGraphBuilder::new("job", vec![]);
        let mut indexes = Vec::new();
        for i in 0..deps.len() {
            let idx = builder
                .add_test_runnable(Runnable::new("noop", Some(&format!("/t/{i}"))))
                .unwrap();
            indexes.push(idx);
        }
        for (i, task_deps) in deps.iter().enumerate() {
            for &d in task_deps {
                builder.add_edge(indexes[d], indexes[i]);
            }
        }

        let graph = builder.build().unwrap();
        let order = graph.get_tasks_in_topological_order();
        prop_assert_eq!(order.len(), deps.len());

        let position: HashMap<usize, usize> =
            order.iter().enumerate().map(|(pos, &idx)| (idx, pos)).collect();
        for (i, task_deps) in deps.iter().enumerate() {
            for &d in task_deps {
                prop_assert!(position[&indexes[d]] < position[&indexes[i]]);
            }
        }
    }

    #[test]
    fn repo_invariants_hold_under_arbitrary_streams(
        events in proptest::collection::vec(
            (0.0f64..100.0, 0u8..3, 0usize..7),
            1..40,
        )
    ) {
        let mut repo = StatusRepo::new("job");
        let results = ["pass", "fail", "skip", "cancel", "error", "warn", "bogus"];

        let mut first_finished: Option<&str> = None;
        for (time, kind, result_idx) in &events {
            let mut msg = match kind {
                0 => Message::started(),
                1 => Message::running(),
                _ => {
                    let result = results[*result_idx];
                    if first_finished.is_none() {
                        first_finished = Some(result);
                    }
                    let mut m = Message::running();
                    m.status = MessageStatus::Finished;
                    m.extra.insert(
                        "result".to_string(),
                        serde_json::Value::String(result.to_string()),
                    );
                    m
                }
            };
            msg.time = *time;
            msg.id = Some("t1".to_string());
            msg.job_id = Some("job".to_string());
            repo.process_message(msg);
        }

        // every valid message lands in the journal
        prop_assert_eq!(repo.get_task_data("t1").unwrap().len(), events.len());

        // the first finished result wins, with unknown values coerced
        match first_finished {
            Some(raw) => {
                let expected = raw.parse::<TaskResult>().unwrap_or(TaskResult::Error);
                prop_assert_eq!(repo.get_task_result("t1"), Some(expected));
                prop_assert!(repo
                    .get_tasks_with_result(expected)
                    .contains(&"t1".to_string()));
                // a finished latest is never displaced by a running message
                let latest = repo.get_latest_task_data("t1").unwrap();
                if latest.status != MessageStatus::Finished {
                    let finished_times: Vec<f64> = repo
                        .get_task_data("t1")
                        .unwrap()
                        .iter()
                        .filter(|m| m.status == MessageStatus::Finished)
                        .map(|m| m.time)
                        .collect();
                    // only possible when every finish was older than the latest
                    prop_assert!(finished_times.iter().all(|t| *t <= latest.time));
                }
            }
            None => {
                prop_assert_eq!(repo.get_task_result("t1"), None);
                // without a finish, the latest is the newest message seen
                let latest = repo.get_latest_task_data("t1").unwrap();
                let max_time = events.iter().map(|(t, _, _)| *t).fold(f64::MIN, f64::max);
                prop_assert!(latest.time >= max_time);
            }
        }
    }
}
