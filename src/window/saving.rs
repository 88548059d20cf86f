//! Per-window save scheduling.
//!
//! Writes run on a [`TaskTracker`] owned by the window, one at a time behind
//! a gate. Starting a save cancels every save that has not begun writing;
//! a write already in progress is allowed to finish so the file is never
//! left half-replaced, and the newer write lands after it. Only the newest
//! save reports a result; callers of older saves receive the newest one.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::persistence::PersistenceGateway;

/// Result of one [`SaveCoordinator::write`] call
#[derive(Debug)]
pub enum WriteResult {
    /// This save was the newest and its write succeeded
    Written,
    /// This save was the newest and its write failed
    Failed(io::Error),
    /// A later save took over; `saved` is that save's result
    Superseded { saved: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SaveReport {
    generation: u64,
    saved: bool,
}

struct SaveState {
    generation: u64,
    current: Option<CancellationToken>,
}

pub struct SaveCoordinator {
    gate: Arc<tokio::sync::Mutex<()>>,
    state: Arc<Mutex<SaveState>>,
    root: CancellationToken,
    reports: Arc<watch::Sender<SaveReport>>,
    tracker: TaskTracker,
}

impl Default for SaveCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveCoordinator {
    pub fn new() -> Self {
        let (reports, _) = watch::channel(SaveReport {
            generation: 0,
            saved: true,
        });
        Self {
            gate: Arc::new(tokio::sync::Mutex::new(())),
            state: Arc::new(Mutex::new(SaveState {
                generation: 0,
                current: None,
            })),
            root: CancellationToken::new(),
            reports: Arc::new(reports),
            tracker: TaskTracker::new(),
        }
    }

    /// Number of save tasks not yet finished
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Number of saves scheduled so far
    pub fn scheduled(&self) -> u64 {
        self.state.lock().generation
    }

    /// Write `text` to `path`, superseding any earlier save
    pub async fn write(
        &self,
        gateway: Arc<dyn PersistenceGateway>,
        path: PathBuf,
        text: String,
    ) -> WriteResult {
        if self.root.is_cancelled() {
            return WriteResult::Superseded { saved: false };
        }

        let (generation, token) = {
            let mut state = self.state.lock();
            if let Some(previous) = state.current.take() {
                previous.cancel();
            }
            state.generation += 1;
            let token = self.root.child_token();
            state.current = Some(token.clone());
            (state.generation, token)
        };
        debug!(generation, path = %path.display(), "Save scheduled");

        let gate = self.gate.clone();
        let state = self.state.clone();
        let reports = self.reports.clone();
        let task = self.tracker.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                _guard = gate.lock_owned() => {
                    if token.is_cancelled() {
                        None
                    } else {
                        Some(gateway.write(&path, &text).await)
                    }
                }
            };

            let is_latest = state.lock().generation == generation;
            if is_latest {
                let saved = matches!(result, Some(Ok(())));
                reports.send_replace(SaveReport { generation, saved });
            }
            (result, is_latest)
        });

        let (result, is_latest) = match task.await {
            Ok(done) => done,
            Err(e) => (Some(Err(io::Error::other(e.to_string()))), false),
        };

        match (result, is_latest) {
            (Some(Ok(())), true) => WriteResult::Written,
            (Some(Err(e)), true) => WriteResult::Failed(e),
            _ => {
                debug!(generation, "Save superseded, waiting for the newer save");
                WriteResult::Superseded {
                    saved: self.wait_for_newer(generation).await,
                }
            }
        }
    }

    async fn wait_for_newer(&self, generation: u64) -> bool {
        let mut rx = self.reports.subscribe();
        let saved = match rx.wait_for(|report| report.generation > generation).await {
            Ok(report) => report.saved,
            Err(_) => false,
        };
        saved
    }

    /// Wait for every scheduled save to finish
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel every save that has not started writing; later saves are refused
    pub fn cancel_all(&self) {
        self.root.cancel();
        self.reports.send_replace(SaveReport {
            generation: u64::MAX,
            saved: false,
        });
    }
}
