//! Script execution module
//!
//! This module handles everything between "run this file" and "the run ended":
//! - Spawning the interpreter in its own process group (`process`)
//! - Streaming stdout/stderr into an observable buffer (`output`)
//! - Run lifecycle, stop and completion (`runner`)
//! - Linking `file:line` references in output back to the script (`hyperlinks`)

mod hyperlinks;
mod output;
mod process;
mod runner;

pub use hyperlinks::{find_links, OutputLink};

pub use output::{OutputCursor, OutputFragment, OutputOrigin, OutputSink};

pub use process::{
    find_executable, ChildProcess, Interpreter, OutputStream, ProcessHost, TokioChild,
    TokioProcessHost,
};

#[cfg(unix)]
pub(crate) use process::unix_process;

pub use runner::{ProcessRunner, RunError, RunHandle, RunOutcome, RunState, RunnerOptions};

#[cfg(test)]
#[path = "../executor_tests.rs"]
mod tests;
