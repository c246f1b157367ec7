//! A scripted spawner for state-machine and job tests.
//!
//! Instead of creating real processes or containers, `MockSpawner` runs a
//! small async "worker" per task that posts `started` / `finished` messages
//! to the task's status endpoints (exercising the real wire path when a
//! status server is bound). Outcomes are scripted per runnable URI; the
//! default is an immediate `pass`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use testdag::errors::Result;
use testdag::spawner::Spawner;
use testdag::status::{Message, StatusClient};
use testdag::task::Task;
use testdag::types::{SpawnMethod, TaskResult};

const METHODS: &[SpawnMethod] = &[SpawnMethod::Any];

/// What the fake worker for one task should do.
#[derive(Debug, Clone)]
pub struct MockOutcome {
    result: TaskResult,
    fail_reason: Option<String>,
    /// Simulated run time before the result is reported.
    delay: Duration,
    /// When false the worker exits without a `finished` message.
    report_finished: bool,
    /// When true the worker never exits on its own (timeout tests).
    hang: bool,
}

impl MockOutcome {
    pub fn result(result: TaskResult) -> Self {
        Self {
            result,
            fail_reason: None,
            delay: Duration::ZERO,
            report_finished: true,
            hang: false,
        }
    }

    pub fn pass() -> Self {
        Self::result(TaskResult::Pass)
    }

    pub fn fail() -> Self {
        Self::result(TaskResult::Fail)
    }

    pub fn with_fail_reason(mut self, reason: &str) -> Self {
        self.fail_reason = Some(reason.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Exit without reporting a `finished` message.
    pub fn silent(mut self) -> Self {
        self.report_finished = false;
        self
    }

    /// Never exit until terminated.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

impl Default for MockOutcome {
    fn default() -> Self {
        Self::pass()
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    alive: watch::Receiver<bool>,
}

#[derive(Default)]
pub struct MockSpawner {
    /// Scripted outcomes keyed by runnable URI.
    outcomes: Mutex<HashMap<String, MockOutcome>>,
    /// URIs whose requirements checks should fail.
    unfulfilled: Mutex<Vec<String>>,
    handles: Mutex<HashMap<String, WorkerHandle>>,
    spawned: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
    current_alive: Arc<AtomicUsize>,
    peak_alive: Arc<AtomicUsize>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome for every task whose runnable URI matches.
    pub fn script(self, uri: &str, outcome: MockOutcome) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(uri.to_string(), outcome);
        self
    }

    /// Make `check_task_requirements` fail for this runnable URI.
    pub fn fail_requirements_for(self, uri: &str) -> Self {
        self.unfulfilled.lock().unwrap().push(uri.to_string());
        self
    }

    /// Task identifiers spawned so far, in spawn order.
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    /// Task identifiers that were terminated by the machine.
    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    /// The highest number of concurrently alive workers observed.
    pub fn peak_alive(&self) -> usize {
        self.peak_alive.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, task: &Task) -> MockOutcome {
        let outcomes = self.outcomes.lock().unwrap();
        task.runnable
            .uri
            .as_deref()
            .and_then(|uri| outcomes.get(uri))
            .cloned()
            .unwrap_or_default()
    }

    fn handle(&self, task_id: &str) -> Option<(CancellationToken, watch::Receiver<bool>)> {
        let handles = self.handles.lock().unwrap();
        handles
            .get(task_id)
            .map(|h| (h.cancel.clone(), h.alive.clone()))
    }
}

#[async_trait]
impl Spawner for MockSpawner {
    fn methods(&self) -> &[SpawnMethod] {
        METHODS
    }

    async fn spawn_task(&self, task: &Task) -> Option<String> {
        let outcome = self.outcome_for(task);
        let identifier = task.identifier.clone();
        let job_id = task.job_id.clone();
        let uris = task.status_uris.clone();

        let cancel = CancellationToken::new();
        let (alive_tx, alive_rx) = watch::channel(true);
        self.handles.lock().unwrap().insert(
            identifier.clone(),
            WorkerHandle {
                cancel: cancel.clone(),
                alive: alive_rx,
            },
        );
        self.spawned.lock().unwrap().push(identifier.clone());

        let current = Arc::clone(&self.current_alive);
        let peak = Arc::clone(&self.peak_alive);
        let now_alive = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now_alive, Ordering::SeqCst);

        let worker_id = identifier.clone();
        tokio::spawn(async move {
            let mut clients: Vec<StatusClient> =
                uris.iter().map(|uri| StatusClient::new(uri)).collect();

            let mut started = Message::started();
            started.id = Some(worker_id.clone());
            started.job_id = Some(job_id.clone());
            post_all(&mut clients, &started).await;

            let work = async {
                tokio::time::sleep(outcome.delay).await;
                if outcome.hang {
                    std::future::pending::<()>().await;
                }
            };
            let ran_to_completion = tokio::select! {
                _ = work => true,
                _ = cancel.cancelled() => false,
            };

            if ran_to_completion && outcome.report_finished {
                let mut finished = Message::finished(outcome.result);
                if let Some(reason) = &outcome.fail_reason {
                    finished = finished.with_fail_reason(reason);
                }
                finished.id = Some(worker_id.clone());
                finished.job_id = Some(job_id);
                post_all(&mut clients, &finished).await;
            }
            for client in &mut clients {
                client.close().await;
            }

            current.fetch_sub(1, Ordering::SeqCst);
            let _ = alive_tx.send(false);
        });

        Some(identifier)
    }

    async fn is_task_alive(&self, task_id: &str) -> bool {
        match self.handle(task_id) {
            Some((_, alive)) => *alive.borrow(),
            None => false,
        }
    }

    async fn wait_task(&self, task_id: &str) {
        let Some((_, mut alive)) = self.handle(task_id) else {
            return;
        };
        while *alive.borrow() {
            if alive.changed().await.is_err() {
                break;
            }
        }
    }

    async fn terminate_task(&self, task_id: &str) -> bool {
        let Some((cancel, mut alive)) = self.handle(task_id) else {
            return false;
        };
        if !*alive.borrow() {
            return false;
        }
        self.terminated.lock().unwrap().push(task_id.to_string());
        cancel.cancel();
        while *alive.borrow() {
            if alive.changed().await.is_err() {
                break;
            }
        }
        true
    }

    async fn check_task_requirements(&self, task: &Task) -> bool {
        let unfulfilled = self.unfulfilled.lock().unwrap();
        !task
            .runnable
            .uri
            .as_deref()
            .map(|uri| unfulfilled.iter().any(|u| u == uri))
            .unwrap_or(false)
    }

    async fn create_task_output_dir(&self, task: &Task) -> Result<()> {
        if let Some(dir) = &task.runnable.output_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

async fn post_all(clients: &mut [StatusClient], msg: &Message) {
    for client in clients {
        let _ = client.post(msg).await;
    }
}
