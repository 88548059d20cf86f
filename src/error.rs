use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, warn};

/// Error severity for UI display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,     // Blue - informational
    Warning,  // Yellow - recoverable
    Error,    // Red - operation failed
    Critical, // Red + modal - requires user action
}

/// Domain-specific errors for the script executor
#[derive(Error, Debug)]
pub enum ScriptExecutorError {
    #[error("Cannot read {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save {}: {source}", .path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process spawn failed for '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Script output stream failed: {0}")]
    StreamRead(String),

    #[error("A script is already running in this window")]
    AlreadyRunning,

    #[error("Script file not found: {}", .0.display())]
    MissingScript(PathBuf),

    #[error("Prompt was cancelled")]
    PromptCancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScriptExecutorError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Load { .. } => ErrorSeverity::Warning,
            Self::Save { .. } => ErrorSeverity::Error,
            Self::Spawn { .. } => ErrorSeverity::Error,
            Self::StreamRead(_) => ErrorSeverity::Error,
            Self::AlreadyRunning => ErrorSeverity::Info,
            Self::MissingScript(_) => ErrorSeverity::Error,
            Self::PromptCancelled => ErrorSeverity::Info,
            Self::Config(_) => ErrorSeverity::Warning,
        }
    }

    /// Short text suitable for a status bar or a content placeholder
    pub fn user_message(&self) -> String {
        match self {
            Self::Load { path, .. } => format!("Cannot read {}", path.display()),
            Self::Save { path, .. } => format!("File isn't saved: {}", path.display()),
            Self::Spawn { command, source } => {
                format!("Could not start interpreter '{}': {}", command, source)
            }
            Self::StreamRead(msg) => format!("Script output could not be read: {}", msg),
            Self::AlreadyRunning => "Script is already running".to_string(),
            Self::MissingScript(path) => format!("Script file not found: {}", path.display()),
            Self::PromptCancelled => "Cancelled".to_string(),
            Self::Config(msg) => format!("Configuration issue: {}", msg),
        }
    }

    /// Cancelled prompts are a normal outcome of dialog-backed flows
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::PromptCancelled)
    }
}

pub type Result<T> = std::result::Result<T, ScriptExecutorError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and user doesn't need to know.
///
/// # Examples
///
/// ```ignore
/// use script_executor::error::ResultExt;
///
/// // Log and continue if the config directory can't be created
/// std::fs::create_dir_all(&dir).warn_on_err();
/// ```
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

/// Panic in debug mode, log error in release mode.
///
/// Use for "impossible" states that should crash during development
/// but gracefully degrade in production.
///
/// ```ignore
/// let outcome = match published {
///     Some(outcome) => outcome,
///     None => {
///         debug_panic!("outcome published without a value");
///         RunOutcome::NotStarted
///     }
/// };
/// ```
#[macro_export]
macro_rules! debug_panic {
    ( $($fmt_arg:tt)* ) => {
        if cfg!(debug_assertions) {
            panic!( $($fmt_arg)* );
        } else {
            tracing::error!("IMPOSSIBLE STATE: {}", format_args!($($fmt_arg)*));
        }
    };
}
