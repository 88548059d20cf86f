//! Process Registry
//!
//! Tracks the interpreter processes started by every window so the
//! application can report them and kill stragglers on shutdown.
//!
//! One registry is shared by all windows of an application; runners
//! register a child after spawning it and unregister it once the run ends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::logging;

/// Information about a tracked child process
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    /// Process ID (also the process group id on Unix)
    pub pid: u32,
    pub script_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    active: Arc<RwLock<HashMap<u32, ProcessInfo>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pid: u32, script_path: &Path, started_at: DateTime<Utc>) {
        logging::log(
            "PROC",
            &format!(
                "Registering process PID {} for script: {}",
                pid,
                script_path.display()
            ),
        );
        self.active.write().insert(
            pid,
            ProcessInfo {
                pid,
                script_path: script_path.to_path_buf(),
                started_at,
            },
        );
    }

    pub fn unregister(&self, pid: u32) -> Option<ProcessInfo> {
        logging::log("PROC", &format!("Unregistering process PID {}", pid));
        self.active.write().remove(&pid)
    }

    /// Snapshot of tracked processes, oldest first
    pub fn active_processes(&self) -> Vec<ProcessInfo> {
        let mut processes: Vec<ProcessInfo> = self.active.read().values().cloned().collect();
        processes.sort_by_key(|info| info.started_at);
        processes
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// SIGKILL every tracked process group and clear tracking.
    ///
    /// Last-resort cleanup at shutdown; windows normally stop their own runs.
    pub fn kill_all(&self) -> usize {
        let processes: Vec<ProcessInfo> = self.active.write().drain().map(|(_, v)| v).collect();
        if processes.is_empty() {
            logging::log("PROC", "No active processes to kill");
            return 0;
        }

        logging::log(
            "PROC",
            &format!("Killing {} active process(es)", processes.len()),
        );
        for info in &processes {
            kill_process_group(info.pid);
        }
        processes.len()
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use crate::executor::unix_process::{signal_process_group, SignalError, SIGKILL};

    match signal_process_group(pid, SIGKILL) {
        Ok(()) => logging::log("PROC", &format!("Killed process group {}", pid)),
        Err(SignalError::NoSuchGroup) => {
            logging::log("PROC", &format!("Process {} already exited", pid))
        }
        Err(e) => logging::log("PROC", &format!("Failed to kill process {}: {}", pid, e)),
    }
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) {
    logging::log(
        "PROC",
        &format!("Non-Unix platform: cannot kill process {}", pid),
    );
}
