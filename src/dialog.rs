//! Awaitable user prompts.
//!
//! A [`DialogWaiter`] represents at most one pending request for a value from
//! the user. The session awaits it; the UI notices that it is awaiting,
//! presents a dialog and resolves it exactly once.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::error::ScriptExecutorError;

/// Answer to the three-way "Save changes?" prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDialogResult {
    Yes,
    No,
    Cancel,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogError {
    #[error("A request is already pending on this dialog")]
    AlreadyAwaiting,
    #[error("No request is pending on this dialog")]
    NotAwaiting,
    #[error("The pending request was abandoned before it was resolved")]
    Abandoned,
}

/// Every way a prompt can end without a value is a cancellation to callers
impl From<DialogError> for ScriptExecutorError {
    fn from(_: DialogError) -> Self {
        ScriptExecutorError::PromptCancelled
    }
}

pub struct DialogWaiter<T> {
    name: &'static str,
    pending: Mutex<Option<oneshot::Sender<T>>>,
    awaiting: watch::Sender<bool>,
}

impl<T: Send> DialogWaiter<T> {
    pub fn new(name: &'static str) -> Self {
        let (awaiting, _) = watch::channel(false);
        Self {
            name,
            pending: Mutex::new(None),
            awaiting,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True while a request is outstanding and its requester is still waiting
    pub fn is_awaiting(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Change notifications for the UI: `true` when a dialog must be shown
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.awaiting.subscribe()
    }

    /// Suspend until a request is pending
    pub async fn wait_until_awaiting(&self) {
        let mut rx = self.awaiting.subscribe();
        let _ = rx.wait_for(|awaiting| *awaiting).await;
    }

    /// Open a request and wait for the UI to resolve it
    pub async fn await_result(&self) -> Result<T, DialogError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            // A requester that gave up leaves a closed sender behind
            if pending.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(DialogError::AlreadyAwaiting);
            }
            *pending = Some(tx);
        }
        debug!(dialog = self.name, "Dialog awaiting result");
        self.awaiting.send_replace(true);
        // Cleared on resolve and also when the requester is dropped mid-wait
        let _clear = AwaitingGuard(&self.awaiting);

        rx.await.map_err(|_| DialogError::Abandoned)
    }

    /// Resolve the outstanding request
    pub fn on_result(&self, value: T) -> Result<(), DialogError> {
        let tx = self
            .pending
            .lock()
            .take()
            .ok_or(DialogError::NotAwaiting)?;
        self.awaiting.send_replace(false);
        debug!(dialog = self.name, "Dialog resolved");
        tx.send(value).map_err(|_| DialogError::Abandoned)
    }

    /// Drop the outstanding request; the requester sees [`DialogError::Abandoned`]
    pub fn abandon(&self) {
        if self.pending.lock().take().is_some() {
            debug!(dialog = self.name, "Dialog abandoned");
        }
        self.awaiting.send_replace(false);
    }
}

struct AwaitingGuard<'a>(&'a watch::Sender<bool>);

impl Drop for AwaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl<T> std::fmt::Debug for DialogWaiter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogWaiter")
            .field("name", &self.name)
            .field("awaiting", &*self.awaiting.borrow())
            .finish()
    }
}
