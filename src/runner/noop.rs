// src/runner/noop.rs

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::runnable::Runnable;
use crate::runner::Runner;
use crate::status::message::Message;
use crate::types::TaskResult;

/// Does nothing, successfully.
#[derive(Debug, Default)]
pub struct NoopRunner;

#[async_trait]
impl Runner for NoopRunner {
    async fn run(&self, _runnable: &Runnable, tx: mpsc::Sender<Message>) -> Result<()> {
        let _ = tx.send(Message::started()).await;
        let _ = tx.send(Message::finished(TaskResult::Pass)).await;
        Ok(())
    }
}
