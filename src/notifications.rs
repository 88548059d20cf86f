//! Window notifications and their delivery to the tray.
//!
//! Windows emit [`WindowNotification`]s on a channel; the application formats
//! each one into a [`Notification`] and hands it to a [`TrayNotifier`].

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::error::ErrorSeverity;

/// Events a window reports to the user outside its own view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowNotification {
    SaveSuccess(PathBuf),
    SaveError(PathBuf),
}

impl WindowNotification {
    pub fn format(&self) -> Notification {
        match self {
            WindowNotification::SaveSuccess(path) => Notification {
                title: "File is saved".to_string(),
                message: path.display().to_string(),
                kind: NotificationType::Info,
            },
            WindowNotification::SaveError(path) => Notification {
                title: "File isn't saved".to_string(),
                message: path.display().to_string(),
                kind: NotificationType::Error,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationType {
    #[default]
    None,
    Info,
    Warning,
    Error,
}

impl NotificationType {
    pub fn from_severity(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Info => NotificationType::Info,
            ErrorSeverity::Warning => NotificationType::Warning,
            ErrorSeverity::Error => NotificationType::Error,
            ErrorSeverity::Critical => NotificationType::Error,
        }
    }
}

/// A formatted tray notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub kind: NotificationType,
}

/// Delivers notifications through the system tray
pub trait TrayNotifier: Send + Sync {
    fn send_notification(&self, notification: Notification);
}

/// Notifier for headless use: notifications only go to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl TrayNotifier for LogNotifier {
    fn send_notification(&self, notification: Notification) {
        let Notification {
            title,
            message,
            kind,
        } = notification;
        match kind {
            NotificationType::Error => error!(event_type = "notification", %title, %message),
            NotificationType::Warning => warn!(event_type = "notification", %title, %message),
            NotificationType::Info | NotificationType::None => {
                info!(event_type = "notification", %title, %message)
            }
        }
    }
}
