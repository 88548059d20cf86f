//! Configuration type definitions

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::executor::{Interpreter, RunnerOptions};

/// Top-level configuration, stored as camelCase JSON.
///
/// Every field has a default, so an empty object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Interpreter executable (default: "kotlinc")
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Arguments passed before the script path (default: ["-script"])
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    /// SIGTERM -> SIGKILL grace period when stopping a run (default: 250)
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Whether the tray icon is shown (default: true)
    #[serde(default = "default_tray_enabled")]
    pub tray_enabled: bool,
    /// Cap on buffered output fragments per run (None = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_max_fragments: Option<usize>,
}

fn default_interpreter() -> String {
    DEFAULT_INTERPRETER.to_string()
}
fn default_interpreter_args() -> Vec<String> {
    DEFAULT_INTERPRETER_ARGS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_stop_grace_ms() -> u64 {
    DEFAULT_STOP_GRACE_MS
}
fn default_tray_enabled() -> bool {
    DEFAULT_TRAY_ENABLED
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            tray_enabled: DEFAULT_TRAY_ENABLED,
            output_max_fragments: None,
        }
    }
}

impl Config {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn interpreter(&self) -> Interpreter {
        Interpreter::new(self.interpreter.clone(), self.interpreter_args.clone())
    }

    /// Options handed to every window's process runner
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            interpreter: self.interpreter(),
            stop_grace: self.stop_grace(),
            max_output_fragments: self.output_max_fragments,
        }
    }
}
