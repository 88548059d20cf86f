//! Interpreter process spawning.
//!
//! [`ProcessHost`] is the seam between the runner and the operating system.
//! [`TokioProcessHost`] spawns real children with piped stdout/stderr; tests
//! substitute hosts whose streams they control.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, instrument, warn};

use crate::logging;

/// Unix-specific process group control
#[cfg(unix)]
pub(crate) mod unix_process {
    use libc::{c_int, pid_t, ESRCH};
    use thiserror::Error;

    #[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SignalError {
        #[error("No such process group")]
        NoSuchGroup,
        #[error("Permission denied")]
        PermissionDenied,
        #[error("Invalid signal")]
        InvalidSignal,
        #[error("Unknown error (errno {0})")]
        Other(i32),
    }

    /// Send a signal to a process group (negative PID targets the group)
    pub fn signal_process_group(pgid: u32, signal: c_int) -> Result<(), SignalError> {
        // Safety: kill() is a plain syscall with no memory safety concerns
        let rc = unsafe { libc::kill(-(pgid as pid_t), signal) };
        if rc == 0 {
            return Ok(());
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Err(match errno {
            libc::ESRCH => SignalError::NoSuchGroup,
            libc::EPERM => SignalError::PermissionDenied,
            libc::EINVAL => SignalError::InvalidSignal,
            other => SignalError::Other(other),
        })
    }

    /// Check if any process in the group is still alive.
    ///
    /// Signal 0 only checks for existence. EPERM still means "alive".
    pub fn process_group_alive(pgid: u32) -> bool {
        // Safety: kill() with signal 0 sends nothing
        let rc = unsafe { libc::kill(-(pgid as pid_t), 0) };
        if rc == 0 {
            true
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            errno != ESRCH
        }
    }

    pub const SIGTERM: c_int = libc::SIGTERM;
    pub const SIGKILL: c_int = libc::SIGKILL;
}

/// Byte stream from a child's stdout or stderr
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Interpreter command line: `<program> <args...> <script>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

impl Interpreter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Program and full argument list for running `script`
    pub fn command_for(&self, script: &Path) -> (String, Vec<String>) {
        let mut args = self.args.clone();
        args.push(script.to_string_lossy().into_owned());
        (self.program.clone(), args)
    }

    /// Human-readable command line, for logs and status text
    pub fn display_command(&self, script: &Path) -> String {
        let (program, args) = self.command_for(script);
        std::iter::once(program)
            .chain(args)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A spawned child process
#[async_trait]
pub trait ChildProcess: Send {
    /// OS process id (also the process group id on Unix)
    fn id(&self) -> Option<u32>;
    fn take_stdout(&mut self) -> Option<OutputStream>;
    fn take_stderr(&mut self) -> Option<OutputStream>;
    /// Wait for exit and return the exit code.
    ///
    /// Must be cancel safe: the runner races it against stop requests.
    async fn wait(&mut self) -> io::Result<i32>;
    /// Terminate the process (and its group), waiting at most `grace` for a
    /// clean exit before killing it. Calling twice is a no-op.
    async fn terminate(&mut self, grace: Duration);
}

pub trait ProcessHost: Send + Sync {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn ChildProcess>>;
}

/// Find an executable, checking common locations that GUI apps might miss
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        debug!(name, path = %path.display(), "Executable found on PATH");
        return Some(path);
    }

    logging::log("EXEC", &format!("{} not on PATH, checking common locations", name));

    let common_paths = [
        dirs::home_dir().map(|h| h.join(".sdkman/candidates/kotlin/current/bin")),
        dirs::home_dir().map(|h| h.join(".local/bin")),
        dirs::home_dir().map(|h| h.join("bin")),
        Some(PathBuf::from("/opt/homebrew/bin")),
        Some(PathBuf::from("/usr/local/bin")),
        Some(PathBuf::from("/usr/bin")),
        Some(PathBuf::from("/bin")),
    ];

    for path in common_paths.iter().flatten() {
        let exe_path = path.join(name);
        if exe_path.is_file() {
            logging::log("EXEC", &format!("  FOUND: {}", exe_path.display()));
            return Some(exe_path);
        }
    }

    logging::log("EXEC", &format!("  NOT FOUND: {}", name));
    None
}

/// Spawns children with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessHost;

impl ProcessHost for TokioProcessHost {
    #[instrument(skip_all, fields(program = %program))]
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn ChildProcess>> {
        let executable = find_executable(program).unwrap_or_else(|| PathBuf::from(program));
        debug!(executable = %executable.display(), args = ?args, "Spawning interpreter");

        let mut command = tokio::process::Command::new(&executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The child's PID becomes its PGID so stop() reaches grandchildren too
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| {
            error!(error = %e, executable = %executable.display(), "Process spawn failed");
            e
        })?;

        let pid = child.id();
        info!(pid = ?pid, executable = %executable.display(), "Process spawned");

        let stdout = child.stdout.take().map(|s| Box::new(s) as OutputStream);
        let stderr = child.stderr.take().map(|s| Box::new(s) as OutputStream);

        Ok(Box::new(TokioChild {
            child,
            pid,
            stdout,
            stderr,
            killed: false,
        }))
    }
}

pub struct TokioChild {
    child: tokio::process::Child,
    pid: Option<u32>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    killed: bool,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(exit_code(status))
    }

    /// SIGTERM the process group, wait up to `grace`, then SIGKILL whatever is left.
    ///
    /// Liveness is checked on the GROUP, not the leader, so children of the
    /// interpreter do not survive as orphans.
    async fn terminate(&mut self, grace: Duration) {
        if self.killed {
            debug!(pid = ?self.pid, "Process already terminated, skipping");
            return;
        }
        self.killed = true;

        #[cfg(unix)]
        {
            if let Some(pgid) = self.pid {
                use unix_process::{
                    process_group_alive, signal_process_group, SignalError, SIGKILL, SIGTERM,
                };

                match signal_process_group(pgid, SIGTERM) {
                    Ok(()) => debug!(pgid, "SIGTERM sent to process group"),
                    Err(SignalError::NoSuchGroup) => {
                        debug!(pgid, "Process group already exited");
                        let _ = self.child.wait().await;
                        return;
                    }
                    Err(e) => warn!(pgid, error = %e, "Failed to send SIGTERM, escalating"),
                }

                let exited = tokio::time::timeout(grace, self.child.wait()).await.is_ok();
                if exited && !process_group_alive(pgid) {
                    info!(pgid, "Process group terminated gracefully after SIGTERM");
                    return;
                }

                info!(
                    pgid,
                    grace_ms = grace.as_millis() as u64,
                    "Process group still alive after grace period, escalating to SIGKILL"
                );
                match signal_process_group(pgid, SIGKILL) {
                    Ok(()) | Err(SignalError::NoSuchGroup) => {}
                    Err(e) => warn!(pgid, error = %e, "SIGKILL failed"),
                }
            }
        }

        // Leader only on non-Unix, and a final reap everywhere
        let _ = self.child.start_kill();
        if let Err(e) = self.child.wait().await {
            warn!(pid = ?self.pid, error = %e, "Failed to reap terminated process");
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    // Shell convention for signal deaths
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
