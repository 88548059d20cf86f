//! Application state: the window list, settings and tray notifications.
//!
//! Windows are kept in creation order. A window removes itself through
//! [`WindowHost::retire_window`] once its exit flow completes; application
//! exit walks the windows newest-first and stops at the first window whose
//! user cancels, leaving the remaining windows open.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::executor::{ProcessHost, TokioProcessHost};
use crate::notifications::{LogNotifier, Notification, TrayNotifier};
use crate::persistence::{FsGateway, PersistenceGateway};
use crate::process_registry::ProcessRegistry;
use crate::window::{SessionCollaborators, WindowHost, WindowId, WindowSession};

/// User-togglable application settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub is_tray_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            is_tray_enabled: true,
        }
    }
}

impl Settings {
    pub fn toggle_tray(&mut self) {
        self.is_tray_enabled = !self.is_tray_enabled;
    }
}

struct AppInner {
    this: Weak<AppInner>,
    config: Config,
    settings: Mutex<Settings>,
    windows: RwLock<Vec<Arc<WindowSession>>>,
    next_window_id: AtomicU64,
    registry: ProcessRegistry,
    gateway: Arc<dyn PersistenceGateway>,
    process_host: Arc<dyn ProcessHost>,
    notifier: Arc<dyn TrayNotifier>,
}

/// Shared handle to the application; clones refer to the same state
#[derive(Clone)]
pub struct ApplicationState {
    inner: Arc<AppInner>,
}

impl ApplicationState {
    pub fn new(config: Config) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(FsGateway),
            Arc::new(TokioProcessHost),
            Arc::new(LogNotifier),
        )
    }

    pub fn with_collaborators(
        config: Config,
        gateway: Arc<dyn PersistenceGateway>,
        process_host: Arc<dyn ProcessHost>,
        notifier: Arc<dyn TrayNotifier>,
    ) -> Self {
        let settings = Settings {
            is_tray_enabled: config.tray_enabled,
        };
        let inner = Arc::new_cyclic(|this| AppInner {
            this: this.clone(),
            config,
            settings: Mutex::new(settings),
            windows: RwLock::new(Vec::new()),
            next_window_id: AtomicU64::new(1),
            registry: ProcessRegistry::new(),
            gateway,
            process_host,
            notifier,
        });
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn settings(&self) -> Settings {
        *self.inner.settings.lock()
    }

    pub fn toggle_tray(&self) {
        let mut settings = self.inner.settings.lock();
        settings.toggle_tray();
        info!(tray_enabled = settings.is_tray_enabled, "Tray setting changed");
    }

    /// The tray icon is shown while enabled and at least one window is open
    pub fn tray_visible(&self) -> bool {
        self.settings().is_tray_enabled && !self.inner.windows.read().is_empty()
    }

    /// Open windows in creation order
    pub fn windows(&self) -> Vec<Arc<WindowSession>> {
        self.inner.windows.read().clone()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.inner.registry
    }

    /// Open an empty untitled window
    pub fn new_window(&self) -> Arc<WindowSession> {
        self.inner.create_window()
    }

    /// Open a window showing `path`
    pub async fn new_window_with_path(&self, path: PathBuf) -> Arc<WindowSession> {
        let window = self.inner.create_window();
        window.initialize(Some(path)).await;
        window
    }

    pub fn send_notification(&self, notification: Notification) {
        self.inner.notifier.send_notification(notification);
    }

    /// Close windows newest-first. Returns false if a window cancelled.
    pub async fn exit(&self) -> bool {
        let windows: Vec<_> = self.windows().into_iter().rev().collect();
        info!(count = windows.len(), "Application exit requested");
        for window in windows {
            if !window.exit().await {
                info!(window = %window.id(), "Application exit cancelled");
                return false;
            }
        }
        let leftover = self.inner.registry.kill_all();
        if leftover > 0 {
            warn!(count = leftover, "Killed processes left behind by closed windows");
        }
        true
    }
}

impl std::fmt::Debug for ApplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationState")
            .field("settings", &self.settings())
            .field("windows", &self.inner.windows.read().len())
            .finish()
    }
}

impl AppInner {
    fn create_window(&self) -> Arc<WindowSession> {
        let id = WindowId(self.next_window_id.fetch_add(1, Ordering::Relaxed));
        let host: Weak<dyn WindowHost> = self.this.clone();
        let window = Arc::new(WindowSession::with_collaborators(
            id,
            self.config.runner_options(),
            SessionCollaborators {
                gateway: self.gateway.clone(),
                process_host: self.process_host.clone(),
                registry: self.registry.clone(),
                host: Some(host),
            },
        ));
        self.spawn_notification_pump(&window);
        self.windows.write().push(window.clone());
        info!(window = %id, "Window created");
        window
    }

    /// Forward a window's notifications to the tray until the window closes
    fn spawn_notification_pump(&self, window: &WindowSession) {
        let Ok(handle) = Handle::try_current() else {
            warn!(window = %window.id(), "No runtime, window notifications are not delivered");
            return;
        };
        let rx = window.notifications();
        let notifier = self.notifier.clone();
        let id = window.id();
        handle.spawn(async move {
            while let Ok(notification) = rx.recv().await {
                debug!(window = %id, ?notification, "Routing window notification");
                notifier.send_notification(notification.format());
            }
            debug!(window = %id, "Notification pump finished");
        });
    }
}

impl WindowHost for AppInner {
    fn new_window(&self) {
        self.create_window();
    }

    fn retire_window(&self, id: WindowId) {
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|w| w.id() != id);
        if windows.len() == before {
            warn!(window = %id, "Retired a window that was not open");
        } else {
            info!(window = %id, remaining = windows.len(), "Window retired");
        }
    }
}
