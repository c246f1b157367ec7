// src/runner/mod.rs

//! Builtin runners.
//!
//! Runners know how to execute runnables of one `kind` and report progress
//! as a stream of status messages over a channel. Rich runner kinds live
//! outside this crate and are reached through the standalone-executable
//! protocol; the builtins here cover the kinds the core itself needs:
//!
//! - `noop` — emits `started` and `finished` with `result=pass`.
//! - `exec` — executes `uri` with the runnable args; non-zero exit is
//!   `error`.
//! - `exec-test` — like `exec`, but non-zero exit is a test `fail`.

pub mod exec;
pub mod noop;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::runnable::Runnable;
use crate::status::message::Message;

pub use exec::ExecRunner;
pub use noop::NoopRunner;

/// A runner drives one runnable and emits status messages into `tx`.
///
/// Implementations report failures *through the message stream* (a
/// `finished` message with `result=error`) whenever they can; the returned
/// error is only for conditions where no message could be produced at all.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, runnable: &Runnable, tx: mpsc::Sender<Message>) -> Result<()>;
}
