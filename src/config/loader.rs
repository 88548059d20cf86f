//! Configuration loading from file system

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use super::defaults::DEFAULT_CONFIG_PATH;
use super::types::Config;
use crate::error::{Result, ScriptExecutorError};

/// Environment variable that overrides the config file location
pub const CONFIG_PATH_ENV: &str = "SCRIPT_EXECUTOR_CONFIG";

/// Resolve the config path: `$SCRIPT_EXECUTOR_CONFIG` or ~/.scriptexecutor/config.json
pub fn config_path() -> PathBuf {
    let raw = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    PathBuf::from(shellexpand::tilde(&raw).as_ref())
}

/// Load configuration from the default location.
///
/// Returns Config::default() if the file is missing or invalid.
pub fn load_config() -> Config {
    load_config_from(&config_path())
}

/// Load configuration from an explicit path.
///
/// Returns Config::default() if any step fails.
#[instrument(name = "load_config", skip_all, fields(path = %path.display()))]
pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        info!("Config file not found, using defaults");
        return Config::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(error = %e, "Failed to read config file, using defaults");
            return Config::default();
        }
    };

    match parse_config(&contents) {
        Ok(config) => {
            info!(interpreter = %config.interpreter, "Successfully loaded config");
            config
        }
        Err(e) => {
            warn!(error = %e, "Using default config");
            Config::default()
        }
    }
}

/// Parse config JSON, attaching a hint for the common mistakes
pub fn parse_config(contents: &str) -> Result<Config> {
    serde_json::from_str::<Config>(contents).map_err(|e| {
        let hint = if e.is_data() && contents.contains("interpreterArgs") {
            " (hint: 'interpreterArgs' must be an array of strings, e.g. [\"-script\"])"
        } else if e.is_syntax() {
            " (hint: config.json must be a JSON object, e.g. { \"interpreter\": \"kotlinc\" })"
        } else {
            ""
        };
        ScriptExecutorError::Config(format!("{}{}", e, hint))
    })
}
