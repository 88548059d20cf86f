use super::*;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::dialog::AlertDialogResult;
use crate::error::ScriptExecutorError;
use crate::executor::{Interpreter, RunOutcome, RunState, RunnerOptions, TokioProcessHost};
use crate::notifications::WindowNotification;
use crate::persistence::{FsGateway, PersistenceGateway};
use crate::process_registry::ProcessRegistry;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Test collaborators
// ============================================================================

/// In-memory files; writes can be held until the test releases them
struct MemoryGateway {
    files: Mutex<HashMap<PathBuf, String>>,
    hold_writes: bool,
    permits: Semaphore,
    writes_started: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryGateway {
    fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            hold_writes: false,
            permits: Semaphore::new(0),
            writes_started: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn holding_writes() -> Self {
        Self {
            hold_writes: true,
            ..Self::new()
        }
    }

    fn with_file(self, path: &Path, content: &str) -> Self {
        self.files.lock().insert(path.to_path_buf(), content.to_string());
        self
    }

    fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }

    fn release_writes(&self, n: usize) {
        self.permits.add_permits(n);
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn read(&self, path: &Path) -> io::Result<String> {
        self.file(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    async fn write(&self, path: &Path, text: &str) -> io::Result<()> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);
        if self.hold_writes {
            self.permits
                .acquire()
                .await
                .map_err(|e| io::Error::other(e.to_string()))?
                .forget();
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"));
        }
        self.files.lock().insert(path.to_path_buf(), text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingHost {
    retired: Mutex<Vec<WindowId>>,
    new_windows: AtomicUsize,
}

impl WindowHost for RecordingHost {
    fn new_window(&self) {
        self.new_windows.fetch_add(1, Ordering::SeqCst);
    }

    fn retire_window(&self, id: WindowId) {
        self.retired.lock().push(id);
    }
}

fn memory_session(gateway: &Arc<MemoryGateway>) -> Arc<WindowSession> {
    crate::logging::init_for_tests();
    Arc::new(WindowSession::with_collaborators(
        WindowId(1),
        RunnerOptions::default(),
        SessionCollaborators {
            gateway: gateway.clone(),
            ..SessionCollaborators::default()
        },
    ))
}

fn hosted_session(gateway: &Arc<MemoryGateway>, host: &Arc<RecordingHost>) -> Arc<WindowSession> {
    let host: Arc<dyn WindowHost> = host.clone();
    let host: Weak<dyn WindowHost> = Arc::downgrade(&host);
    Arc::new(WindowSession::with_collaborators(
        WindowId(7),
        RunnerOptions::default(),
        SessionCollaborators {
            gateway: gateway.clone(),
            host: Some(host),
            ..SessionCollaborators::default()
        },
    ))
}

/// Session on the real file system, running scripts with `interpreter`
fn fs_session(interpreter: Interpreter) -> Arc<WindowSession> {
    crate::logging::init_for_tests();
    Arc::new(WindowSession::with_collaborators(
        WindowId(2),
        RunnerOptions {
            interpreter,
            stop_grace: Duration::from_millis(100),
            max_output_fragments: None,
        },
        SessionCollaborators {
            gateway: Arc::new(FsGateway),
            process_host: Arc::new(TokioProcessHost),
            registry: ProcessRegistry::new(),
            host: None,
        },
    ))
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn drain_notifications(session: &WindowSession) -> Vec<WindowNotification> {
    let rx = session.notifications();
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

// ============================================================================
// Document state
// ============================================================================

#[tokio::test]
async fn test_title_and_save_enablement() {
    let path = PathBuf::from("/scripts/hello.kts");
    let gateway = Arc::new(MemoryGateway::new().with_file(&path, "println(1)"));
    let session = memory_session(&gateway);

    session.initialize(None).await;
    assert_eq!(session.title(), "Untitled - ScriptExecutor");
    assert!(session.can_save());

    session.initialize(Some(path.clone())).await;
    assert_eq!(session.title(), "/scripts/hello.kts - ScriptExecutor");
    assert!(!session.can_save());
    assert_eq!(session.text(), "println(1)");

    session.set_text("println(2)");
    assert_eq!(session.title(), "*/scripts/hello.kts - ScriptExecutor");
    assert!(session.can_save());
}

#[tokio::test]
async fn test_load_failure_shows_placeholder() {
    let gateway = Arc::new(MemoryGateway::new());
    let session = memory_session(&gateway);
    let missing = PathBuf::from("/scripts/missing.kts");

    session.initialize(Some(missing.clone())).await;
    assert_eq!(session.text(), "Cannot read /scripts/missing.kts");
    assert_eq!(session.path(), Some(missing));
    assert!(!session.is_dirty());
}

#[tokio::test]
async fn test_open_discarding_changes() {
    let first = PathBuf::from("/a.kts");
    let second = PathBuf::from("/b.kts");
    let gateway = Arc::new(
        MemoryGateway::new()
            .with_file(&first, "a")
            .with_file(&second, "b"),
    );
    let session = memory_session(&gateway);
    session.initialize(Some(first.clone())).await;
    session.set_text("a edited");

    let opening = {
        let session = session.clone();
        let second = second.clone();
        tokio::spawn(async move { session.open(second).await })
    };
    session.exit_dialog().wait_until_awaiting().await;
    session.exit_dialog().on_result(AlertDialogResult::No).unwrap();

    assert!(opening.await.unwrap());
    assert_eq!(session.text(), "b");
    assert!(!session.is_dirty());
    // Discarded edits never reached storage
    assert_eq!(gateway.file(&first).as_deref(), Some("a"));
}

#[tokio::test]
async fn test_open_dialog_cancelled_keeps_document() {
    let path = PathBuf::from("/a.kts");
    let gateway = Arc::new(MemoryGateway::new().with_file(&path, "a"));
    let session = memory_session(&gateway);
    session.initialize(Some(path.clone())).await;

    let opening = {
        let session = session.clone();
        tokio::spawn(async move { session.open_with_dialog().await })
    };
    session.open_dialog().wait_until_awaiting().await;
    session.open_dialog().on_result(None).unwrap();

    assert!(!opening.await.unwrap());
    assert_eq!(session.path(), Some(path));
    assert_eq!(session.text(), "a");
}

#[tokio::test]
async fn test_open_with_dialog_loads_choice() {
    let path = PathBuf::from("/chosen.kts");
    let gateway = Arc::new(MemoryGateway::new().with_file(&path, "chosen"));
    let session = memory_session(&gateway);
    session.initialize(None).await;

    let opening = {
        let session = session.clone();
        tokio::spawn(async move { session.open_with_dialog().await })
    };
    session.open_dialog().wait_until_awaiting().await;
    session.open_dialog().on_result(Some(path.clone())).unwrap();

    assert!(opening.await.unwrap());
    assert_eq!(session.text(), "chosen");
    assert_eq!(session.path(), Some(path));
}

// ============================================================================
// Saving
// ============================================================================

#[tokio::test]
async fn test_save_untitled_asks_for_path() {
    let gateway = Arc::new(MemoryGateway::new());
    let session = memory_session(&gateway);
    session.initialize(None).await;
    session.set_text("val x = 1");

    let saving = {
        let session = session.clone();
        tokio::spawn(async move { session.save().await })
    };
    session.save_dialog().wait_until_awaiting().await;
    let path = PathBuf::from("/new.kts");
    session.save_dialog().on_result(Some(path.clone())).unwrap();

    assert!(saving.await.unwrap());
    assert_eq!(gateway.file(&path).as_deref(), Some("val x = 1"));
    assert!(!session.is_dirty());
    assert_eq!(session.path(), Some(path.clone()));
    assert_eq!(
        drain_notifications(&session),
        vec![WindowNotification::SaveSuccess(path)]
    );
}

#[tokio::test]
async fn test_save_untitled_cancelled() {
    let gateway = Arc::new(MemoryGateway::new());
    let session = memory_session(&gateway);
    session.initialize(None).await;
    session.set_text("draft");

    let saving = {
        let session = session.clone();
        tokio::spawn(async move { session.save().await })
    };
    session.save_dialog().wait_until_awaiting().await;
    session.save_dialog().on_result(None).unwrap();

    assert!(!saving.await.unwrap());
    assert!(session.is_dirty());
    assert_eq!(session.path(), None);
    assert!(drain_notifications(&session).is_empty());
}

#[tokio::test]
async fn test_save_failure_keeps_dirty_and_notifies() {
    let path = PathBuf::from("/ro/a.kts");
    let gateway = Arc::new(MemoryGateway::new().with_file(&path, "old"));
    let session = memory_session(&gateway);
    session.initialize(Some(path.clone())).await;
    session.set_text("new");
    gateway.fail_writes.store(true, Ordering::SeqCst);

    assert!(!session.save().await);
    assert!(session.is_dirty());
    assert_eq!(gateway.file(&path).as_deref(), Some("old"));
    assert_eq!(
        drain_notifications(&session),
        vec![WindowNotification::SaveError(path)]
    );
}

#[tokio::test]
async fn test_newer_save_supersedes_in_flight_save() {
    let path = PathBuf::from("/a.kts");
    let gateway = Arc::new(MemoryGateway::holding_writes().with_file(&path, "v0"));
    let session = memory_session(&gateway);
    session.initialize(Some(path.clone())).await;

    session.set_text("v1");
    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.save().await })
    };
    eventually(|| gateway.writes_started() == 1).await;

    session.set_text("v2");
    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.save().await })
    };
    eventually(|| session.saves_in_flight() == 2).await;

    gateway.release_writes(2);
    assert!(first.await.unwrap());
    assert!(second.await.unwrap());

    assert_eq!(gateway.file(&path).as_deref(), Some("v2"));
    assert!(!session.is_dirty());
    assert_eq!(
        drain_notifications(&session),
        vec![WindowNotification::SaveSuccess(path)]
    );
}

#[tokio::test]
async fn test_pending_save_is_cancelled_before_writing() {
    let path = PathBuf::from("/a.kts");
    let gateway = Arc::new(MemoryGateway::holding_writes().with_file(&path, "v0"));
    let session = memory_session(&gateway);
    session.initialize(Some(path.clone())).await;

    let mut saves = Vec::new();
    for (i, text) in ["v1", "v2", "v3"].into_iter().enumerate() {
        session.set_text(text);
        let session_for_task = session.clone();
        saves.push(tokio::spawn(async move { session_for_task.save().await }));
        eventually(|| session.saves_scheduled() == i as u64 + 1).await;
        if i == 0 {
            eventually(|| gateway.writes_started() == 1).await;
        }
    }

    gateway.release_writes(3);
    for save in saves {
        assert!(save.await.unwrap());
    }

    // v1 was already writing; v2 never started
    assert_eq!(gateway.writes_started(), 2);
    assert_eq!(gateway.file(&path).as_deref(), Some("v3"));
    assert!(!session.is_dirty());
    assert_eq!(drain_notifications(&session).len(), 1);
}

// ============================================================================
// Exit
// ============================================================================

#[tokio::test]
async fn test_exit_cancel_keeps_window() {
    let path = PathBuf::from("/a.kts");
    let gateway = Arc::new(MemoryGateway::new().with_file(&path, "a"));
    let host = Arc::new(RecordingHost::default());
    let session = hosted_session(&gateway, &host);
    session.initialize(Some(path)).await;
    session.set_text("unsaved");

    let exiting = {
        let session = session.clone();
        tokio::spawn(async move { session.exit().await })
    };
    session.exit_dialog().wait_until_awaiting().await;
    session.exit_dialog().on_result(AlertDialogResult::Cancel).unwrap();

    assert!(!exiting.await.unwrap());
    assert!(session.is_dirty());
    assert!(host.retired.lock().is_empty());
}

#[tokio::test]
async fn test_exit_discard_retires_window() {
    let path = PathBuf::from("/a.kts");
    let gateway = Arc::new(MemoryGateway::new().with_file(&path, "a"));
    let host = Arc::new(RecordingHost::default());
    let session = hosted_session(&gateway, &host);
    session.initialize(Some(path.clone())).await;
    session.set_text("unsaved");

    let exiting = {
        let session = session.clone();
        tokio::spawn(async move { session.exit().await })
    };
    session.exit_dialog().wait_until_awaiting().await;
    session.exit_dialog().on_result(AlertDialogResult::No).unwrap();

    assert!(exiting.await.unwrap());
    assert_eq!(*host.retired.lock(), vec![WindowId(7)]);
    assert_eq!(gateway.file(&path).as_deref(), Some("a"));
}

#[tokio::test]
async fn test_exit_save_untitled_then_retire() {
    let gateway = Arc::new(MemoryGateway::new());
    let host = Arc::new(RecordingHost::default());
    let session = hosted_session(&gateway, &host);
    session.initialize(None).await;
    session.set_text("keep me");

    let exiting = {
        let session = session.clone();
        tokio::spawn(async move { session.exit().await })
    };
    session.exit_dialog().wait_until_awaiting().await;
    session.exit_dialog().on_result(AlertDialogResult::Yes).unwrap();
    session.save_dialog().wait_until_awaiting().await;
    let path = PathBuf::from("/kept.kts");
    session.save_dialog().on_result(Some(path.clone())).unwrap();

    assert!(exiting.await.unwrap());
    assert_eq!(gateway.file(&path).as_deref(), Some("keep me"));
    assert_eq!(host.retired.lock().len(), 1);
    // Delivered before the channel closed
    assert_eq!(
        drain_notifications(&session),
        vec![WindowNotification::SaveSuccess(path)]
    );
}

#[tokio::test]
async fn test_exit_save_cancelled_keeps_window() {
    let gateway = Arc::new(MemoryGateway::new());
    let host = Arc::new(RecordingHost::default());
    let session = hosted_session(&gateway, &host);
    session.initialize(None).await;
    session.set_text("draft");

    let exiting = {
        let session = session.clone();
        tokio::spawn(async move { session.exit().await })
    };
    session.exit_dialog().wait_until_awaiting().await;
    session.exit_dialog().on_result(AlertDialogResult::Yes).unwrap();
    session.save_dialog().wait_until_awaiting().await;
    session.save_dialog().on_result(None).unwrap();

    assert!(!exiting.await.unwrap());
    assert!(host.retired.lock().is_empty());
}

#[tokio::test]
async fn test_clean_exit_skips_prompt() {
    let gateway = Arc::new(MemoryGateway::new());
    let host = Arc::new(RecordingHost::default());
    let session = hosted_session(&gateway, &host);
    session.initialize(None).await;

    assert!(session.exit().await);
    assert!(!session.exit_dialog().is_awaiting());
    assert_eq!(host.retired.lock().len(), 1);
}

#[tokio::test]
async fn test_new_window_forwards_to_host() {
    let gateway = Arc::new(MemoryGateway::new());
    let host = Arc::new(RecordingHost::default());
    let session = hosted_session(&gateway, &host);
    session.new_window();
    assert_eq!(host.new_windows.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Running
// ============================================================================

#[tokio::test]
async fn test_untitled_run_saves_then_reports_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let session = fs_session(Interpreter::new(
        "definitely-not-an-interpreter-9f2c",
        vec!["-script".to_string()],
    ));
    session.initialize(None).await;
    session.set_text("println(\"hi\")");

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.run_script().await })
    };
    session.save_dialog().wait_until_awaiting().await;
    let path = dir.path().join("hi.kts");
    session.save_dialog().on_result(Some(path.clone())).unwrap();

    let result = running.await.unwrap();
    assert!(matches!(result, Err(ScriptExecutorError::Spawn { .. })));
    assert!(session.status().starts_with("Could not start interpreter"));
    assert_eq!(session.run_state(), RunState::Idle);
    assert_eq!(session.run_button(), RunButtonIcon::Run);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "println(\"hi\")");
    assert!(!session.is_dirty());
}

#[tokio::test]
async fn test_untitled_run_aborts_when_save_cancelled() {
    let session = fs_session(Interpreter::new("sh", Vec::new()));
    session.initialize(None).await;
    session.set_text("echo hi");

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.run_or_stop().await })
    };
    session.save_dialog().wait_until_awaiting().await;
    session.save_dialog().on_result(None).unwrap();
    running.await.unwrap();

    assert_eq!(session.status(), "");
    assert_eq!(session.run_state(), RunState::Idle);
    assert!(session.output().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_uses_saved_file_not_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.sh");
    std::fs::write(&path, "echo original\n").unwrap();
    let session = fs_session(Interpreter::new("sh", Vec::new()));
    session.initialize(Some(path.clone())).await;
    session.set_text("echo edited\n");

    let outcome = session.run_script().await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(0));
    assert_eq!(session.output().snapshot(), "original");
    assert!(!session.save_dialog().is_awaiting());
    assert!(session.is_dirty());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo original\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_exit_code_reported_in_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fail.sh");
    std::fs::write(&path, "echo failing\nexit 2\n").unwrap();
    let session = fs_session(Interpreter::new("sh", Vec::new()));
    session.initialize(Some(path)).await;

    session.run_or_stop().await;
    assert_eq!(session.status(), "Script executed, exit code: 2");
    assert_eq!(session.run_button(), RunButtonIcon::Run);
    assert_eq!(session.run_state(), RunState::Completed(2));
    assert_eq!(session.output().snapshot(), "failing");
}

#[cfg(unix)]
#[tokio::test]
async fn test_silent_script_exit_code_reported_in_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("silent.sh");
    std::fs::write(&path, "exit 2\n").unwrap();
    let session = fs_session(Interpreter::new("sh", Vec::new()));
    session.initialize(Some(path)).await;

    session.run_or_stop().await;
    assert_eq!(session.status(), "Script executed, exit code: 2");
    assert_eq!(session.run_button(), RunButtonIcon::Run);
    assert_eq!(session.run_state(), RunState::Completed(2));
    assert!(session.output().is_empty());
    assert_eq!(session.output().snapshot(), "");
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_or_stop_toggles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.sh");
    std::fs::write(&path, "echo started\nsleep 30\n").unwrap();
    let session = fs_session(Interpreter::new("sh", Vec::new()));
    session.initialize(Some(path)).await;

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.run_or_stop().await })
    };
    eventually(|| session.output().len() == 1).await;
    assert!(session.is_running());
    assert_eq!(session.status(), STATUS_RUNNING);
    assert_eq!(session.run_button(), RunButtonIcon::Stop);

    session.run_or_stop().await;
    tokio::time::timeout(TEST_TIMEOUT, running)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(session.status(), STATUS_STOPPED);
    assert_eq!(session.run_button(), RunButtonIcon::Run);
    assert_eq!(session.run_state(), RunState::Cancelled);
    assert_eq!(session.output().snapshot(), "started");
}

#[cfg(unix)]
#[tokio::test]
async fn test_exit_stops_running_script() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.sh");
    std::fs::write(&path, "echo started\nsleep 30\n").unwrap();
    let session = fs_session(Interpreter::new("sh", Vec::new()));
    session.initialize(Some(path)).await;

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.run_script().await })
    };
    eventually(|| session.output().len() == 1).await;

    assert!(tokio::time::timeout(TEST_TIMEOUT, session.exit()).await.unwrap());
    assert!(!session.is_running());
    assert_eq!(running.await.unwrap().unwrap(), RunOutcome::Cancelled);
}

#[cfg(unix)]
#[tokio::test]
async fn test_output_links_point_at_script() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("diag.sh");
    std::fs::write(&path, "echo 'diag.sh:3:7: error: boom' 1>&2\nexit 1\n").unwrap();
    let session = fs_session(Interpreter::new("sh", Vec::new()));
    session.initialize(Some(path)).await;

    session.run_script().await.unwrap();
    let links = session.output_links();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].line, 3);
    assert_eq!(links[0].column, Some(7));
}
