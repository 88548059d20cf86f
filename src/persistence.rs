//! Asynchronous document storage.
//!
//! The window session only talks to [`PersistenceGateway`]; [`FsGateway`] is
//! the file-system implementation used by the application.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn read(&self, path: &Path) -> std::io::Result<String>;
    async fn write(&self, path: &Path, text: &str) -> std::io::Result<()>;
}

/// Reads and writes documents with `tokio::fs`.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a reader never observes a half-written script.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsGateway;

#[async_trait]
impl PersistenceGateway for FsGateway {
    async fn read(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, text: &str) -> std::io::Result<()> {
        let temp_path = temp_path_for(path);
        debug!(path = %path.display(), temp = %temp_path.display(), "Writing document");

        if let Err(e) = tokio::fs::write(&temp_path, text).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }
}

/// `dir/name.ext` -> `dir/.name.ext.saving`
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_else(|| path.as_os_str()));
    name.push(".saving");
    path.with_file_name(name)
}
