// src/runner/exec.rs

//! Process-executing runners (`exec` and `exec-test`).

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::Result;
use crate::runnable::Runnable;
use crate::runner::Runner;
use crate::status::message::Message;
use crate::types::TaskResult;

/// Executes the runnable's `uri` as a program with its args.
///
/// String-valued kwargs become environment variables of the child. Stdout
/// and stderr are streamed line-wise as `running` messages; the final
/// `finished` message carries the `returncode`.
#[derive(Debug)]
pub struct ExecRunner {
    /// Result reported for a non-zero exit: `error` for plain `exec`,
    /// `fail` for `exec-test`.
    nonzero_result: TaskResult,
}

impl ExecRunner {
    pub fn exec() -> Self {
        Self {
            nonzero_result: TaskResult::Error,
        }
    }

    pub fn exec_test() -> Self {
        Self {
            nonzero_result: TaskResult::Fail,
        }
    }
}

#[async_trait]
impl Runner for ExecRunner {
    async fn run(&self, runnable: &Runnable, tx: mpsc::Sender<Message>) -> Result<()> {
        let uri = match &runnable.uri {
            Some(uri) => uri.clone(),
            None => {
                let _ = tx
                    .send(
                        Message::finished(TaskResult::Error)
                            .with_fail_reason("exec runnable has no uri to execute"),
                    )
                    .await;
                return Ok(());
            }
        };

        let mut cmd = Command::new(&uri);
        cmd.args(&runnable.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, val) in &runnable.kwargs {
            if let Some(s) = val.as_str() {
                cmd.env(key, s);
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = tx
                    .send(
                        Message::finished(TaskResult::Error)
                            .with_fail_reason(&format!("failed to execute '{uri}': {e}")),
                    )
                    .await;
                return Ok(());
            }
        };

        let _ = tx.send(Message::started()).await;

        // Stream both pipes so buffers never fill while we wait.
        let stdout_task = child.stdout.take().map(|out| {
            let tx = tx.clone();
            tokio::spawn(async move { stream_lines(out, "stdout", tx).await })
        });
        let stderr_task = child.stderr.take().map(|err| {
            let tx = tx.clone();
            tokio::spawn(async move { stream_lines(err, "stderr", tx).await })
        });

        let status = child.wait().await?;
        if let Some(handle) = stdout_task {
            let _ = handle.await;
        }
        if let Some(handle) = stderr_task {
            let _ = handle.await;
        }

        let code = status.code().unwrap_or(-1);
        let result = if status.success() {
            TaskResult::Pass
        } else {
            self.nonzero_result
        };
        debug!(uri = %uri, returncode = code, result = %result, "exec child exited");

        let _ = tx
            .send(Message::finished(result).with_returncode(code))
            .await;
        Ok(())
    }
}

async fn stream_lines<R>(reader: R, stream_type: &str, tx: mpsc::Sender<Message>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut payload = line.into_bytes();
        payload.push(b'\n');
        if tx
            .send(Message::running_log(stream_type, &payload))
            .await
            .is_err()
        {
            break;
        }
    }
}
