//! Configuration module - interpreter settings and user preferences
//!
//! This module provides functionality for:
//! - Loading configuration from ~/.scriptexecutor/config.json
//! - Default values for all settings
//! - Type definitions for config structures
//!
//! # Module Structure
//!
//! - `defaults` - All default constant values
//! - `types` - Configuration struct definitions
//! - `loader` - File system loading and parsing

mod defaults;
mod loader;
mod types;

pub use defaults::{
    DEFAULT_INTERPRETER, DEFAULT_INTERPRETER_ARGS, DEFAULT_STOP_GRACE_MS, DEFAULT_TRAY_ENABLED,
};

pub use types::Config;

pub use loader::{config_path, load_config, load_config_from, parse_config, CONFIG_PATH_ENV};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
