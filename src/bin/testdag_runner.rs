// src/bin/testdag_runner.rs

//! The bundled standalone worker binary.
//!
//! Implements the two commands of the runner protocol:
//!
//! - `capabilities` prints the JSON capabilities document (which runnable
//!   kinds this binary handles) on stdout.
//! - `task-run` executes one task in-process and reports status messages to
//!   the `-s` endpoints, or as JSON lines on stdout when none are given.
//!
//! External runners for other kinds implement the same interface under the
//! name `testdag-runner-<kind>`.

use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use testdag::errors::Result;
use testdag::logging;
use testdag::registry::RunnerRegistry;
use testdag::runnable::recipe::split_key_val;
use testdag::runnable::Runnable;
use testdag::status::StatusClient;
use testdag::task::Task;
use testdag::types::TaskCategory;

#[derive(Debug, Parser)]
#[command(
    name = "testdag-runner",
    version,
    about = "Standalone worker for testdag tasks.",
    long_about = None
)]
struct Cli {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TESTDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the capabilities JSON document.
    Capabilities,
    /// Execute one task and report its status.
    TaskRun(TaskRunArgs),
}

#[derive(Debug, clap::Args)]
struct TaskRunArgs {
    /// Task identifier.
    #[arg(short = 'i', long = "identifier")]
    identifier: String,

    /// Job id this task belongs to.
    #[arg(short = 'j', long = "job-id", default_value = "")]
    job_id: String,

    /// Kind of runnable (selects the runner).
    #[arg(short = 'k', long = "kind")]
    kind: String,

    /// Runnable URI.
    #[arg(short = 'u', long = "uri")]
    uri: Option<String>,

    /// Configuration snapshot as a JSON object.
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Positional runnable argument (repeatable; `base64:` prefixed values
    /// are decoded).
    #[arg(short = 'a', long = "arg")]
    args: Vec<String>,

    /// Status service URI to report to (repeatable).
    #[arg(short = 's', long = "status-uri")]
    status_uris: Vec<String>,

    /// Task category.
    #[arg(short = 't', long = "category", default_value = "test")]
    category: String,

    /// Keyword arguments as `key=value` (`json:` prefixed values are
    /// JSON-parsed; `tags`, `variant` and `output_dir` are reserved).
    #[arg(value_name = "KEY=VALUE")]
    kwargs: Vec<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("testdag-runner error: {err}");
        std::process::exit(1);
    }
}

async fn run_main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.map(Into::into))?;

    let registry = RunnerRegistry::with_builtin_runners();
    match cli.command {
        Command::Capabilities => {
            println!("{}", registry.capabilities());
            Ok(())
        }
        Command::TaskRun(args) => task_run(&registry, args).await,
    }
}

async fn task_run(registry: &RunnerRegistry, args: TaskRunArgs) -> Result<()> {
    let kwargs = args
        .kwargs
        .iter()
        .map(|raw| split_key_val(raw))
        .collect::<Result<Vec<_>>>()?;
    let runnable = Runnable::from_args(
        &args.kind,
        args.uri.as_deref(),
        &args.args,
        args.config.as_deref(),
        &kwargs,
    )?;
    let category = args
        .category
        .parse::<TaskCategory>()
        .map_err(testdag::TestdagError::Config)?;

    let mut task = Task::new(
        runnable,
        Some(args.identifier),
        args.status_uris,
        category,
        &args.job_id,
    );

    let mut clients: Vec<StatusClient> = task.status_uris.iter().map(|u| StatusClient::new(u)).collect();

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let run = async { task.run(registry, tx).await };
    tokio::pin!(run);

    let mut run_done = false;
    let mut run_result = Ok(());
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => {
                    if clients.is_empty() {
                        println!("{}", msg.to_wire());
                        continue;
                    }
                    for client in &mut clients {
                        if let Err(e) = client.post(&msg).await {
                            warn!(uri = %client.uri(), error = %e, "status post failed");
                        }
                    }
                }
                None => break,
            },
            result = &mut run, if !run_done => {
                run_done = true;
                run_result = result;
            }
        }
    }

    for client in &mut clients {
        client.close().await;
    }
    run_result
}
