//! Script run lifecycle.
//!
//! A [`ProcessRunner`] owns at most one interpreter process at a time. Each
//! run gets two reader tasks (stdout, stderr) that append lines into the
//! shared [`OutputSink`] as they arrive, and one supervisor task that races
//! process exit against stop requests and read failures, terminates the
//! child on every exit path, joins both readers (for at most the stop grace
//! period) and publishes the outcome.
//!
//! ```text
//! Idle -> Starting -> Running -> Completed(code) | Cancelled | StreamError(msg)
//!              \
//!               -> Failed(msg)   (spawn failure)
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::output::{OutputOrigin, OutputSink};
use super::process::{ChildProcess, Interpreter, OutputStream, ProcessHost};
use crate::config::{DEFAULT_INTERPRETER, DEFAULT_INTERPRETER_ARGS, DEFAULT_STOP_GRACE_MS};
use crate::error::ScriptExecutorError;
use crate::logging;
use crate::process_registry::ProcessRegistry;

/// Per-runner settings derived from the application config
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOptions {
    pub interpreter: Interpreter,
    /// SIGTERM -> SIGKILL grace period when stopping
    pub stop_grace: Duration,
    pub max_output_fragments: Option<usize>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            interpreter: Interpreter::new(
                DEFAULT_INTERPRETER,
                DEFAULT_INTERPRETER_ARGS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
            max_output_fragments: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Completed(i32),
    Cancelled,
    Failed(String),
    StreamError(String),
}

impl RunState {
    /// A process is being started or is running
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Starting | RunState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed(_)
                | RunState::Cancelled
                | RunState::Failed(_)
                | RunState::StreamError(_)
        )
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No run has finished on this runner yet
    NotStarted,
    Completed(i32),
    Cancelled,
    /// Reading the process output failed; the process was terminated
    StreamError(String),
    /// The process could not be started or waited on
    Failed(String),
}

impl RunOutcome {
    fn as_state(&self) -> RunState {
        match self {
            RunOutcome::NotStarted => RunState::Idle,
            RunOutcome::Completed(code) => RunState::Completed(*code),
            RunOutcome::Cancelled => RunState::Cancelled,
            RunOutcome::StreamError(msg) => RunState::StreamError(msg.clone()),
            RunOutcome::Failed(msg) => RunState::Failed(msg.clone()),
        }
    }

    fn action(&self) -> &'static str {
        match self {
            RunOutcome::NotStarted => "not_started",
            RunOutcome::Completed(_) => "completed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::StreamError(_) => "stream_error",
            RunOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("A script is already running")]
    AlreadyRunning,

    #[error("Script file not found: {}", .0.display())]
    MissingScript(PathBuf),

    #[error("Process spawn failed for '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl From<RunError> for ScriptExecutorError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::AlreadyRunning => ScriptExecutorError::AlreadyRunning,
            RunError::MissingScript(path) => ScriptExecutorError::MissingScript(path),
            RunError::Spawn { command, source } => ScriptExecutorError::Spawn { command, source },
        }
    }
}

/// Returned by [`ProcessRunner::start`]; resolves to this run's outcome
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub pid: Option<u32>,
    pub script_path: PathBuf,
    pub started_at: DateTime<Utc>,
    outcome: watch::Receiver<Option<RunOutcome>>,
}

impl RunHandle {
    pub async fn wait(mut self) -> RunOutcome {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => match (*outcome).clone() {
                Some(outcome) => outcome,
                None => {
                    crate::debug_panic!("wait_for(Option::is_some) yielded None");
                    RunOutcome::NotStarted
                }
            },
            Err(_) => RunOutcome::Failed("Run supervisor ended unexpectedly".to_string()),
        }
    }
}

struct ActiveRun {
    id: u64,
    stop: CancellationToken,
    script_path: PathBuf,
}

struct RunnerInner {
    active: Option<ActiveRun>,
    last_outcome: RunOutcome,
    next_run_id: u64,
}

/// State shared between the runner and its supervisor tasks
struct RunnerShared {
    inner: Mutex<RunnerInner>,
    state: watch::Sender<RunState>,
}

pub struct ProcessRunner {
    shared: Arc<RunnerShared>,
    host: Arc<dyn ProcessHost>,
    output: OutputSink,
    options: RunnerOptions,
    registry: ProcessRegistry,
}

impl ProcessRunner {
    pub fn new(options: RunnerOptions, host: Arc<dyn ProcessHost>, registry: ProcessRegistry) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            shared: Arc::new(RunnerShared {
                inner: Mutex::new(RunnerInner {
                    active: None,
                    last_outcome: RunOutcome::NotStarted,
                    next_run_id: 0,
                }),
                state,
            }),
            host,
            output: OutputSink::new(options.max_output_fragments),
            options,
            registry,
        }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn state(&self) -> RunState {
        self.shared.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.borrow().is_active()
    }

    /// State change notifications
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.shared.state.subscribe()
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    /// The script the active run is bound to
    pub fn script_path(&self) -> Option<PathBuf> {
        self.shared
            .inner
            .lock()
            .active
            .as_ref()
            .map(|run| run.script_path.clone())
    }

    pub fn last_outcome(&self) -> RunOutcome {
        self.shared.inner.lock().last_outcome.clone()
    }

    /// Start the interpreter on `script_path` and return immediately.
    ///
    /// Must be called within a Tokio runtime: the reader and supervisor tasks
    /// are spawned onto it.
    #[instrument(skip(self), fields(script = %script_path.display()))]
    pub fn start(&self, script_path: &Path) -> Result<RunHandle, RunError> {
        // Held across the whole transition so two starts cannot both pass the check
        let mut inner = self.shared.inner.lock();
        if self.shared.state.borrow().is_active() {
            debug!("Start rejected, a run is already active");
            return Err(RunError::AlreadyRunning);
        }
        if !script_path.is_file() {
            return Err(RunError::MissingScript(script_path.to_path_buf()));
        }

        self.shared.state.send_replace(RunState::Starting);
        self.output.reset();

        let (program, args) = self.options.interpreter.command_for(script_path);
        let mut child = match self.host.spawn(&program, &args) {
            Ok(child) => child,
            Err(source) => {
                let message = format!("Could not start interpreter '{}': {}", program, source);
                logging::log_error("EXEC", &message, Some(&script_path.display().to_string()));
                inner.last_outcome = RunOutcome::Failed(message.clone());
                self.shared.state.send_replace(RunState::Failed(message));
                return Err(RunError::Spawn {
                    command: program,
                    source,
                });
            }
        };

        let pid = child.id();
        let started_at = Utc::now();
        let stop = CancellationToken::new();
        inner.next_run_id += 1;
        let run_id = inner.next_run_id;
        inner.active = Some(ActiveRun {
            id: run_id,
            stop: stop.clone(),
            script_path: script_path.to_path_buf(),
        });
        if let Some(pid) = pid {
            self.registry.register(pid, script_path, started_at);
        }
        self.shared.state.send_replace(RunState::Running);
        logging::log_run_event(script_path, "started", pid, None);

        let (outcome_tx, outcome_rx) = watch::channel(None);
        let stdout = child.take_stdout();
        let stderr = child.take_stderr();
        let supervised = SupervisedRun {
            id: run_id,
            child,
            stdout,
            stderr,
            pid,
            script_path: script_path.to_path_buf(),
            started: Instant::now(),
            stop,
            grace: self.options.stop_grace,
            output: self.output.clone(),
            shared: self.shared.clone(),
            registry: self.registry.clone(),
            outcome_tx,
        };
        tokio::spawn(supervise(supervised));
        drop(inner);

        Ok(RunHandle {
            pid,
            script_path: script_path.to_path_buf(),
            started_at,
            outcome: outcome_rx,
        })
    }

    /// Ask the active run to terminate. Idempotent; a no-op when not running.
    ///
    /// Returns true if this call requested the stop.
    pub fn stop(&self) -> bool {
        let inner = self.shared.inner.lock();
        match &inner.active {
            Some(run) if !run.stop.is_cancelled() => {
                info!(script = %run.script_path.display(), "Stop requested");
                run.stop.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait until no run is active and return the last outcome
    pub async fn await_completion(&self) -> RunOutcome {
        let mut rx = self.shared.state.subscribe();
        // The sender lives in `self.shared`, so this cannot fail
        let _ = rx.wait_for(|state| !state.is_active()).await;
        self.last_outcome()
    }

    /// Return a finished runner to `Idle`
    pub fn reset(&self) {
        self.shared.state.send_if_modified(|state| {
            if state.is_terminal() {
                *state = RunState::Idle;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        if let Some(run) = &self.shared.inner.lock().active {
            debug!(script = %run.script_path.display(), "Runner dropped, stopping active run");
            run.stop.cancel();
        }
    }
}

/// Everything the supervisor task owns for one run
struct SupervisedRun {
    id: u64,
    child: Box<dyn ChildProcess>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    pid: Option<u32>,
    script_path: PathBuf,
    started: Instant,
    stop: CancellationToken,
    grace: Duration,
    output: OutputSink,
    shared: Arc<RunnerShared>,
    registry: ProcessRegistry,
    outcome_tx: watch::Sender<Option<RunOutcome>>,
}

/// First read error of a run; firing it ends the run
#[derive(Clone, Default)]
struct StreamFailure {
    message: Arc<Mutex<Option<String>>>,
    signal: CancellationToken,
}

impl StreamFailure {
    fn record(&self, message: String) {
        self.message.lock().get_or_insert(message);
        self.signal.cancel();
    }

    fn message(&self) -> Option<String> {
        self.message.lock().clone()
    }
}

enum Ending {
    Stopped,
    StreamFailed,
    Exited(io::Result<i32>),
}

/// How joining the reader tasks ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    Complete,
    TimedOut,
    /// Stop requested after exit while the pipes were still open
    Stopped,
}

/// Join the reader tasks, giving up after `limit`. Returns false on timeout.
async fn join_readers(readers: &mut [JoinHandle<()>], limit: Duration) -> bool {
    tokio::time::timeout(limit, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await
    .is_ok()
}

async fn supervise(run: SupervisedRun) {
    let SupervisedRun {
        id,
        mut child,
        stdout,
        stderr,
        pid,
        script_path,
        started,
        stop,
        grace,
        output,
        shared,
        registry,
        outcome_tx,
    } = run;

    let failure = StreamFailure::default();
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    for (stream, origin) in [(stdout, OutputOrigin::Stdout), (stderr, OutputOrigin::Stderr)] {
        if let Some(stream) = stream {
            readers.push(tokio::spawn(drain_stream(
                stream,
                origin,
                output.clone(),
                failure.clone(),
            )));
        }
    }

    // Stop wins over everything else observed at the same time
    let ending = tokio::select! {
        biased;
        _ = stop.cancelled() => Ending::Stopped,
        _ = failure.signal.cancelled() => Ending::StreamFailed,
        status = child.wait() => Ending::Exited(status),
    };

    if !matches!(ending, Ending::Exited(_)) {
        child.terminate(grace).await;
    }

    // Readers reach EOF once every holder of the pipes is gone. A process that
    // left its group (setsid) survives the group kill and may keep them open,
    // so the join is bounded by the grace period in every path.
    let exited = matches!(ending, Ending::Exited(_));
    let drain = tokio::select! {
        biased;
        complete = join_readers(&mut readers, grace) => {
            if complete { Drain::Complete } else { Drain::TimedOut }
        }
        _ = stop.cancelled(), if exited => Drain::Stopped,
    };
    if drain != Drain::Complete {
        if drain == Drain::TimedOut {
            info!(
                grace_ms = grace.as_millis() as u64,
                "Output still open after grace period, abandoning readers"
            );
        }
        child.terminate(grace).await;
        for reader in &readers {
            reader.abort();
        }
        // Handles the join already consumed must not be polled again
        for reader in readers.into_iter().filter(|r| !r.is_finished()) {
            let _ = reader.await;
        }
    }

    let outcome = match ending {
        _ if drain == Drain::Stopped => RunOutcome::Cancelled,
        Ending::Stopped => RunOutcome::Cancelled,
        Ending::StreamFailed => RunOutcome::StreamError(
            failure
                .message()
                .unwrap_or_else(|| "unknown read error".to_string()),
        ),
        Ending::Exited(Ok(code)) => match failure.message() {
            Some(message) => RunOutcome::StreamError(message),
            None => RunOutcome::Completed(code),
        },
        Ending::Exited(Err(e)) => RunOutcome::Failed(format!("Could not wait for process: {}", e)),
    };

    if let Some(pid) = pid {
        registry.unregister(pid);
    }
    let duration_ms = started.elapsed().as_millis() as u64;
    logging::log_run_event(&script_path, outcome.action(), pid, Some(duration_ms));
    match &outcome {
        RunOutcome::Completed(code) => info!(exit_code = code, duration_ms, "Script finished"),
        RunOutcome::StreamError(msg) => warn!(error = %msg, "Script output could not be read"),
        RunOutcome::Failed(msg) => warn!(error = %msg, "Script run failed"),
        _ => {}
    }

    {
        let mut inner = shared.inner.lock();
        inner.last_outcome = outcome.clone();
        if inner.active.as_ref().is_some_and(|active| active.id == id) {
            inner.active = None;
        }
    }
    shared.state.send_replace(outcome.as_state());
    let _ = outcome_tx.send(Some(outcome));
}

/// Append each line of `stream` to `sink` until EOF or a read error
async fn drain_stream(
    stream: OutputStream,
    origin: OutputOrigin,
    sink: OutputSink,
    failure: StreamFailure,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.append(line.trim_end_matches(&['\r', '\n'][..]), origin);
            }
            Err(e) => {
                warn!(origin = %origin, error = %e, "Failed to read script output");
                failure.record(format!("{}: {}", origin, e));
                break;
            }
        }
    }
    debug!(origin = %origin, "Output reader finished");
}
