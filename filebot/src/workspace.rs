//! Scratch directories for workflow instances.
//!
//! Layout: `<root>/<kind dir>/<chat id>/<instance id>/`. A [`ScratchDir`]
//! removes its directory when dropped, together with the chat directory if
//! that is left empty.

use crate::message::ChatId;
use crate::session::WorkflowKind;
use filebot_common::util::sanitize_filename;
use std::io;
use std::path::{Path, PathBuf};

/// Root of all scratch space.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every chat's scratch space for one workflow kind.
    pub fn kind_root(&self, kind: WorkflowKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Create the scratch directory for one workflow instance.
    pub fn scratch(
        &self,
        kind: WorkflowKind,
        chat: ChatId,
        instance_id: &str,
    ) -> io::Result<ScratchDir> {
        let chat_dir = self.kind_root(kind).join(chat.to_string());
        let path = chat_dir.join(instance_id);
        std::fs::create_dir_all(&path)?;
        tracing::debug!(path = %path.display(), "Created scratch directory");
        Ok(ScratchDir { path, chat_dir })
    }

    /// Remove leftovers from a previous run. Returns the number of kind
    /// directories that were removed.
    pub fn purge(&self) -> io::Result<usize> {
        let mut removed = 0;
        for kind in WorkflowKind::ALL {
            let dir = self.kind_root(kind);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

/// Scratch directory owned by one workflow instance.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    chat_dir: PathBuf,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for a file inside the directory. The name is sanitized so it
    /// can never escape the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        let base = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let clean = sanitize_filename(&base);
        let clean = match clean.as_str() {
            "" | "." | ".." => "file".to_string(),
            _ => clean,
        };
        self.path.join(clean)
    }

    /// Create a subdirectory.
    pub fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let dir = self.file(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
        // Fails while sibling instances still exist, which is fine.
        let _ = std::fs::remove_dir(&self.chat_dir);
    }
}
