//! One editor window: its document, its runner, its dialogs.
//!
//! All operations take `&self` so the UI can hold the session in an `Arc`
//! and drive several flows at once (stop while a run is being awaited,
//! answer a dialog while a save waits on it). Locks are never held across
//! an await.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::saving::{SaveCoordinator, WriteResult};
use super::status::{outcome_status, RunButtonIcon, STATUS_RUNNING};
use crate::dialog::{AlertDialogResult, DialogWaiter};
use crate::document::DocumentBuffer;
use crate::error::{Result, ScriptExecutorError};
use crate::executor::{
    find_links, OutputLink, OutputSink, ProcessHost, ProcessRunner, RunOutcome, RunState,
    RunnerOptions, TokioProcessHost,
};
use crate::logging;
use crate::notifications::WindowNotification;
use crate::persistence::{FsGateway, PersistenceGateway};
use crate::process_registry::ProcessRegistry;

const APP_NAME: &str = "ScriptExecutor";
const NOTIFICATION_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// The application side of a window
pub trait WindowHost: Send + Sync {
    fn new_window(&self);
    /// The window finished its exit flow and must be dropped from the window list
    fn retire_window(&self, id: WindowId);
}

/// Everything a session needs from outside, injectable for tests
pub struct SessionCollaborators {
    pub gateway: Arc<dyn PersistenceGateway>,
    pub process_host: Arc<dyn ProcessHost>,
    pub registry: ProcessRegistry,
    pub host: Option<Weak<dyn WindowHost>>,
}

impl Default for SessionCollaborators {
    fn default() -> Self {
        Self {
            gateway: Arc::new(FsGateway),
            process_host: Arc::new(TokioProcessHost),
            registry: ProcessRegistry::new(),
            host: None,
        }
    }
}

#[derive(Debug, Default)]
struct ViewState {
    status: String,
    run_button: RunButtonIcon,
}

pub struct WindowSession {
    id: WindowId,
    document: Mutex<DocumentBuffer>,
    view: Mutex<ViewState>,
    runner: ProcessRunner,
    gateway: Arc<dyn PersistenceGateway>,
    open_dialog: DialogWaiter<Option<PathBuf>>,
    save_dialog: DialogWaiter<Option<PathBuf>>,
    exit_dialog: DialogWaiter<AlertDialogResult>,
    notifications_tx: async_channel::Sender<WindowNotification>,
    notifications_rx: async_channel::Receiver<WindowNotification>,
    saves: SaveCoordinator,
    host: Option<Weak<dyn WindowHost>>,
}

impl WindowSession {
    /// Standalone window on the real file system and process table
    pub fn new(id: WindowId, options: RunnerOptions) -> Self {
        Self::with_collaborators(id, options, SessionCollaborators::default())
    }

    pub fn with_collaborators(
        id: WindowId,
        options: RunnerOptions,
        collaborators: SessionCollaborators,
    ) -> Self {
        let SessionCollaborators {
            gateway,
            process_host,
            registry,
            host,
        } = collaborators;
        let (notifications_tx, notifications_rx) = async_channel::bounded(NOTIFICATION_CAPACITY);
        Self {
            id,
            document: Mutex::new(DocumentBuffer::new()),
            view: Mutex::new(ViewState::default()),
            runner: ProcessRunner::new(options, process_host, registry),
            gateway,
            open_dialog: DialogWaiter::new("open"),
            save_dialog: DialogWaiter::new("save"),
            exit_dialog: DialogWaiter::new("exit"),
            notifications_tx,
            notifications_rx,
            saves: SaveCoordinator::new(),
            host,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    // ------------------------------------------------------------------
    // Observable state
    // ------------------------------------------------------------------

    pub fn text(&self) -> String {
        self.document.lock().content().to_string()
    }

    /// Editing path: replaces the text and marks the document dirty
    pub fn set_text(&self, text: impl Into<String>) {
        self.document.lock().set_content(text);
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.document.lock().path().map(Path::to_path_buf)
    }

    pub fn is_dirty(&self) -> bool {
        self.document.lock().is_dirty()
    }

    /// `*` when dirty, then the path (or "Untitled")
    pub fn title(&self) -> String {
        let document = self.document.lock();
        let change_mark = if document.is_dirty() { "*" } else { "" };
        let file = document
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "Untitled".to_string());
        format!("{}{} - {}", change_mark, file, APP_NAME)
    }

    /// Whether the Save action is enabled
    pub fn can_save(&self) -> bool {
        let document = self.document.lock();
        document.is_dirty() || document.is_untitled()
    }

    pub fn status(&self) -> String {
        self.view.lock().status.clone()
    }

    pub fn run_button(&self) -> RunButtonIcon {
        self.view.lock().run_button
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    pub fn run_state(&self) -> RunState {
        self.runner.state()
    }

    pub fn output(&self) -> &OutputSink {
        self.runner.output()
    }

    /// `file:line` references to the current script in the output
    pub fn output_links(&self) -> Vec<OutputLink> {
        let Some(file_name) = self
            .path()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            return Vec::new();
        };
        find_links(&self.output().snapshot(), &file_name)
    }

    pub fn open_dialog(&self) -> &DialogWaiter<Option<PathBuf>> {
        &self.open_dialog
    }

    pub fn save_dialog(&self) -> &DialogWaiter<Option<PathBuf>> {
        &self.save_dialog
    }

    pub fn exit_dialog(&self) -> &DialogWaiter<AlertDialogResult> {
        &self.exit_dialog
    }

    /// Stream of save notifications, drained by the application
    pub fn notifications(&self) -> async_channel::Receiver<WindowNotification> {
        self.notifications_rx.clone()
    }

    pub fn saves_in_flight(&self) -> usize {
        self.saves.in_flight()
    }

    pub fn saves_scheduled(&self) -> u64 {
        self.saves.scheduled()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Window launch: load `path`, or start an empty untitled document
    pub async fn initialize(&self, path: Option<PathBuf>) {
        match path {
            Some(path) => self.load(path).await,
            None => {
                self.document.lock().reset_untitled();
            }
        }
    }

    pub fn new_window(&self) {
        if let Some(host) = self.host.as_ref().and_then(Weak::upgrade) {
            host.new_window();
        }
    }

    /// Open `path`, asking to save unsaved changes first
    pub async fn open(&self, path: PathBuf) -> bool {
        if !self.ask_to_save().await {
            return false;
        }
        self.load(path).await;
        true
    }

    /// Open a file chosen through the open dialog
    pub async fn open_with_dialog(&self) -> bool {
        if !self.ask_to_save().await {
            return false;
        }
        match self.open_dialog.await_result().await {
            Ok(Some(path)) => {
                self.load(path).await;
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    #[instrument(skip(self, path), fields(window = %self.id, path = %path.display()))]
    async fn load(&self, path: PathBuf) {
        match self.gateway.read(&path).await {
            Ok(content) => {
                info!(bytes = content.len(), "Document loaded");
                self.document.lock().load(path, content);
            }
            Err(source) => {
                let err = ScriptExecutorError::Load {
                    path: path.clone(),
                    source,
                };
                logging::log_error("LOAD", &err.to_string(), None);
                self.document.lock().load_failed(path, err.user_message());
            }
        }
    }

    /// Save the document; untitled documents ask for a path first.
    ///
    /// Returns false if the dialog was cancelled or the write failed.
    pub async fn save(&self) -> bool {
        match self.save_document().await {
            Ok(()) => true,
            Err(e) if e.is_cancellation() => {
                debug!(window = %self.id, "Save cancelled");
                false
            }
            Err(e) => {
                warn!(window = %self.id, error = %e, "Save failed");
                false
            }
        }
    }

    async fn save_document(&self) -> Result<()> {
        let path = match self.path() {
            Some(path) => path,
            None => self
                .save_dialog
                .await_result()
                .await?
                .ok_or(ScriptExecutorError::PromptCancelled)?,
        };

        let snapshot = {
            let mut document = self.document.lock();
            document.set_path(path.clone());
            document.snapshot()
        };
        let bytes = snapshot.text.len();

        match self
            .saves
            .write(self.gateway.clone(), path.clone(), snapshot.text)
            .await
        {
            WriteResult::Written => {
                self.document.lock().mark_saved(snapshot.revision);
                logging::log_save_event(&path, true, bytes);
                self.notify(WindowNotification::SaveSuccess(path));
                Ok(())
            }
            WriteResult::Failed(source) => {
                self.document.lock().mark_save_failed();
                logging::log_save_event(&path, false, bytes);
                self.notify(WindowNotification::SaveError(path.clone()));
                Err(ScriptExecutorError::Save { path, source })
            }
            // The newer save already updated the document and notified
            WriteResult::Superseded { saved: true } => Ok(()),
            WriteResult::Superseded { saved: false } => Err(ScriptExecutorError::Save {
                path,
                source: std::io::Error::other("superseded by a save that did not complete"),
            }),
        }
    }

    fn notify(&self, notification: WindowNotification) {
        if let Err(e) = self.notifications_tx.try_send(notification) {
            warn!(window = %self.id, error = %e, "Window notification dropped");
        }
    }

    /// The run/stop toggle
    pub async fn run_or_stop(&self) {
        if self.is_running() {
            self.stop_script();
        } else if let Err(e) = self.run_script().await {
            debug!(window = %self.id, error = %e, "Run did not start");
        }
    }

    /// Run the saved file and wait for the run to end.
    ///
    /// An untitled document is saved first. The interpreter always reads
    /// the file on disk; unsaved edits to a titled document are not part of
    /// the run.
    pub async fn run_script(&self) -> Result<RunOutcome> {
        let path = match self.path() {
            Some(path) => path,
            None => {
                self.save_document().await?;
                self.path().ok_or(ScriptExecutorError::PromptCancelled)?
            }
        };

        let handle = match self.runner.start(&path) {
            Ok(handle) => handle,
            Err(e) => {
                let err = ScriptExecutorError::from(e);
                if !matches!(err, ScriptExecutorError::AlreadyRunning) {
                    self.set_view(err.user_message(), RunButtonIcon::Run);
                    self.runner.reset();
                }
                return Err(err);
            }
        };

        self.set_view(STATUS_RUNNING.to_string(), RunButtonIcon::Stop);
        let outcome = handle.wait().await;
        self.set_view(outcome_status(&outcome), RunButtonIcon::Run);
        Ok(outcome)
    }

    pub fn stop_script(&self) {
        self.runner.stop();
    }

    fn set_view(&self, status: String, run_button: RunButtonIcon) {
        let mut view = self.view.lock();
        view.status = status;
        view.run_button = run_button;
    }

    /// Yes saves, No discards, Cancel aborts. Clean documents pass through.
    pub async fn ask_to_save(&self) -> bool {
        if !self.is_dirty() {
            return true;
        }
        match self.exit_dialog.await_result().await {
            Ok(AlertDialogResult::Yes) => self.save().await,
            Ok(AlertDialogResult::No) => true,
            Ok(AlertDialogResult::Cancel) | Err(_) => false,
        }
    }

    /// Close the window. Returns false if the user cancelled.
    #[instrument(skip(self), fields(window = %self.id))]
    pub async fn exit(&self) -> bool {
        if !self.ask_to_save().await {
            info!("Exit cancelled");
            return false;
        }

        if self.runner.is_running() {
            self.runner.stop();
            self.runner.await_completion().await;
        }
        self.saves.cancel_all();
        self.saves.drain().await;
        self.open_dialog.abandon();
        self.save_dialog.abandon();
        self.notifications_tx.close();

        if let Some(host) = self.host.as_ref().and_then(Weak::upgrade) {
            host.retire_window(self.id);
        }
        info!("Window closed");
        true
    }
}

impl std::fmt::Debug for WindowSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowSession")
            .field("id", &self.id)
            .field("path", &self.path())
            .field("dirty", &self.is_dirty())
            .field("run_state", &self.run_state())
            .finish()
    }
}
