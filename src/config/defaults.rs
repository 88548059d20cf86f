//! Default configuration values
//!
//! All constants used throughout the config module are defined here.

/// Interpreter launched for every run
pub const DEFAULT_INTERPRETER: &str = "kotlinc";

/// Arguments placed between the interpreter and the script path
pub const DEFAULT_INTERPRETER_ARGS: &[&str] = &["-script"];

/// Grace period after SIGTERM before escalating to SIGKILL when a run is stopped
pub const DEFAULT_STOP_GRACE_MS: u64 = 250;

/// Tray icon shown while at least one window is open
pub const DEFAULT_TRAY_ENABLED: bool = true;

/// Default config location, tilde-expanded at load time
pub const DEFAULT_CONFIG_PATH: &str = "~/.scriptexecutor/config.json";
