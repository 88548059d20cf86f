//! ScriptExecutor - edit a script, run it through an interpreter, watch its output
//!
//! This library holds everything below the UI: per-window sessions with their
//! documents, the process runner that streams interpreter output, the save
//! scheduling, dialogs as awaitable values, and the application's window list.

pub mod app;
pub mod config;
pub mod dialog;
pub mod document;
pub mod error;
pub mod executor;
pub mod logging;
pub mod notifications;
pub mod persistence;
pub mod process_registry;
pub mod window;
