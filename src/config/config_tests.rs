use super::*;
use crate::error::ScriptExecutorError;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.interpreter, DEFAULT_INTERPRETER);
    assert_eq!(config.interpreter_args, vec!["-script".to_string()]);
    assert_eq!(config.stop_grace_ms, DEFAULT_STOP_GRACE_MS);
    assert_eq!(config.tray_enabled, DEFAULT_TRAY_ENABLED);
    assert_eq!(config.output_max_fragments, None);
}

#[test]
fn test_empty_object_uses_defaults() {
    let config: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_partial_config_keeps_other_defaults() {
    let config: Config = serde_json::from_str(r#"{"interpreter": "python3"}"#).unwrap();
    assert_eq!(config.interpreter, "python3");
    assert_eq!(config.interpreter_args, DEFAULT_INTERPRETER_ARGS.to_vec());
}

#[test]
fn test_camel_case_field_names() {
    let json = r#"{
        "interpreter": "sh",
        "interpreterArgs": [],
        "stopGraceMs": 10,
        "trayEnabled": false,
        "outputMaxFragments": 100
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();
    assert!(config.interpreter_args.is_empty());
    assert_eq!(config.stop_grace(), Duration::from_millis(10));
    assert!(!config.tray_enabled);
    assert_eq!(config.output_max_fragments, Some(100));
}

#[test]
fn test_output_cap_skipped_when_unset() {
    let json = serde_json::to_string(&Config::default()).unwrap();
    assert!(!json.contains("outputMaxFragments"));
    assert!(json.contains("stopGraceMs"));
}

#[test]
fn test_runner_options_from_config() {
    let config = Config {
        interpreter: "sh".to_string(),
        interpreter_args: vec!["-e".to_string()],
        stop_grace_ms: 40,
        tray_enabled: true,
        output_max_fragments: Some(8),
    };
    let options = config.runner_options();
    assert_eq!(options.interpreter.program, "sh");
    assert_eq!(options.interpreter.args, vec!["-e".to_string()]);
    assert_eq!(options.stop_grace, Duration::from_millis(40));
    assert_eq!(options.max_output_fragments, Some(8));
}

#[test]
fn test_load_missing_file_returns_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("nope.json"));
    assert_eq!(config, Config::default());
}

#[test]
fn test_load_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"interpreter": "bash", "interpreterArgs": ["--norc"]}"#).unwrap();

    let config = load_config_from(&path);
    assert_eq!(config.interpreter, "bash");
    assert_eq!(config.interpreter_args, vec!["--norc".to_string()]);
}

#[test]
fn test_load_invalid_json_returns_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "interpreter = kotlinc").unwrap();

    assert_eq!(load_config_from(&path), Config::default());
}

#[test]
fn test_load_wrong_type_returns_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"interpreterArgs": "-script"}"#).unwrap();

    assert_eq!(load_config_from(&path), Config::default());
}

#[test]
fn test_config_path_is_expanded() {
    // No env override in the test environment unless a developer set one
    if std::env::var(CONFIG_PATH_ENV).is_err() {
        let path = config_path();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with(".scriptexecutor/config.json"));
    }
}

#[test]
fn test_parse_error_carries_hint() {
    let err = parse_config(r#"{"interpreterArgs": "-script"}"#).unwrap_err();
    assert!(matches!(err, ScriptExecutorError::Config(_)));
    assert!(err.to_string().contains("must be an array of strings"));
}
