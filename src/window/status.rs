//! Status bar text and run button state.

use crate::error::ScriptExecutorError;
use crate::executor::RunOutcome;

pub const STATUS_RUNNING: &str = "Running script...";
pub const STATUS_STOPPED: &str = "Script stopped";

/// Icon shown on the run/stop toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunButtonIcon {
    #[default]
    Run,
    Stop,
}

impl RunButtonIcon {
    pub fn asset_name(&self) -> &'static str {
        match self {
            RunButtonIcon::Run => "run.png",
            RunButtonIcon::Stop => "stop.png",
        }
    }
}

/// Status line shown after a run ends
pub fn outcome_status(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed(code) => format!("Script executed, exit code: {}", code),
        RunOutcome::Cancelled => STATUS_STOPPED.to_string(),
        RunOutcome::StreamError(msg) => ScriptExecutorError::StreamRead(msg.clone()).user_message(),
        RunOutcome::Failed(msg) => msg.clone(),
        RunOutcome::NotStarted => String::new(),
    }
}
