//! Editor windows
//!
//! - `session` - the per-window controller driving documents, runs and dialogs
//! - `saving` - last-write-wins scheduling of a window's saves
//! - `status` - status text and run button state

mod saving;
mod session;
mod status;

pub use saving::{SaveCoordinator, WriteResult};
pub use session::{SessionCollaborators, WindowHost, WindowId, WindowSession};
pub use status::{outcome_status, RunButtonIcon, STATUS_RUNNING, STATUS_STOPPED};

#[cfg(test)]
#[path = "../window_session_tests.rs"]
mod tests;
