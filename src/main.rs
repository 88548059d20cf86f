//! Headless ScriptExecutor: run a script file and stream its output.
//!
//! ```text
//! script-executor run hello.kts
//! script-executor run --interpreter python3 hello.py
//! script-executor run --interpreter kotlinc --arg -script hello.kts
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use script_executor::app::ApplicationState;
use script_executor::config::{load_config, load_config_from, Config};
use script_executor::error::{ResultExt, ScriptExecutorError};
use script_executor::executor::{OutputCursor, OutputOrigin, OutputSink, RunOutcome};
use script_executor::logging;

const EXIT_FAILURE: i32 = 1;
const EXIT_NOT_STARTED: i32 = 127;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "script-executor", version, about = "Run scripts and stream their output")]
struct Cli {
    /// Config file (defaults to $SCRIPT_EXECUTOR_CONFIG or ~/.scriptexecutor/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a script and exit with its exit code
    Run {
        file: PathBuf,
        /// Interpreter executable, overrides the config
        #[arg(long)]
        interpreter: Option<String>,
        /// Interpreter argument placed before the script path (repeatable).
        /// Replaces the configured arguments when given.
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = logging::init();

    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };

    let code = match cli.command {
        Command::Run {
            file,
            interpreter,
            args,
        } => run(config, file, interpreter, args).await?,
    };

    drop(guard);
    std::process::exit(code);
}

async fn run(
    mut config: Config,
    file: PathBuf,
    interpreter: Option<String>,
    args: Vec<String>,
) -> Result<i32> {
    if let Some(interpreter) = interpreter {
        config.interpreter = interpreter;
    }
    if !args.is_empty() {
        config.interpreter_args = args;
    }
    let file = std::path::absolute(&file)
        .with_context(|| format!("Cannot resolve script path {}", file.display()))?;

    let app = ApplicationState::new(config);
    let window = app.new_window_with_path(file.clone()).await;

    let printing = CancellationToken::new();
    // Taken before the run starts so no early line is missed
    let cursor = OutputCursor::at_end(window.output());
    let printer = tokio::spawn(print_output(
        window.output().clone(),
        cursor,
        printing.clone(),
    ));

    let result = {
        let run = window.run_script();
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping script");
                window.stop_script();
                run.await
            }
        }
    };

    printing.cancel();
    printer.await.warn_on_err();

    let code = match result {
        Ok(outcome) => {
            if !window.status().is_empty() {
                eprintln!("{}", window.status());
            }
            exit_code(&outcome)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            match e {
                ScriptExecutorError::Spawn { .. } => EXIT_NOT_STARTED,
                _ => EXIT_FAILURE,
            }
        }
    };

    app.exit().await;
    Ok(code)
}

fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed(code) => *code,
        RunOutcome::Cancelled => EXIT_INTERRUPTED,
        RunOutcome::NotStarted | RunOutcome::StreamError(_) | RunOutcome::Failed(_) => {
            EXIT_FAILURE
        }
    }
}

/// Echo new output fragments as they arrive; flushes the rest on cancel
async fn print_output(output: OutputSink, mut cursor: OutputCursor, done: CancellationToken) {
    let mut revisions = output.subscribe();
    loop {
        let finished = tokio::select! {
            changed = revisions.changed() => changed.is_err(),
            _ = done.cancelled() => true,
        };
        for fragment in cursor.read(&output) {
            match fragment.origin {
                OutputOrigin::Stdout => println!("{}", fragment.text),
                OutputOrigin::Stderr => eprintln!("{}", fragment.text),
            }
        }
        let _ = std::io::stdout().flush();
        if finished {
            break;
        }
    }
}
