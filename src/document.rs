//! In-memory document owned by one window.
//!
//! The dirty flag follows a revision counter rather than a plain boolean
//! reset, so a save that completes after the user kept typing does not mark
//! the newer text as persisted.

use std::path::{Path, PathBuf};

/// Owned copy of the document text handed to background tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub text: String,
    pub revision: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentBuffer {
    content: String,
    path: Option<PathBuf>,
    is_dirty: bool,
    /// Bumped on every content change
    revision: u64,
}

impl DocumentBuffer {
    /// Empty untitled document
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn is_untitled(&self) -> bool {
        self.path.is_none()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Editing path: always marks the document dirty
    pub fn set_content(&mut self, text: impl Into<String>) {
        self.content = text.into();
        self.revision += 1;
        self.is_dirty = true;
    }

    /// Replace the document with freshly loaded content
    pub fn load(&mut self, path: PathBuf, content: String) {
        self.content = content;
        self.path = Some(path);
        self.revision += 1;
        self.is_dirty = false;
    }

    /// Replace the content with a placeholder after a failed load.
    ///
    /// The path is kept so the window title still names the file the user asked for.
    pub fn load_failed(&mut self, path: PathBuf, placeholder: String) {
        self.load(path, placeholder);
    }

    /// Reset to an empty untitled document
    pub fn reset_untitled(&mut self) {
        self.content.clear();
        self.path = None;
        self.revision += 1;
        self.is_dirty = false;
    }

    /// Bind the document to a destination chosen for saving
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            text: self.content.clone(),
            revision: self.revision,
        }
    }

    /// Record a successful write of the snapshot taken at `revision`.
    ///
    /// Returns true if the document is now clean. Edits made after the
    /// snapshot keep the document dirty.
    pub fn mark_saved(&mut self, revision: u64) -> bool {
        if self.revision == revision {
            self.is_dirty = false;
        }
        !self.is_dirty
    }

    /// A failed write never leaves the document looking safe
    pub fn mark_save_failed(&mut self) {
        self.is_dirty = true;
    }
}
