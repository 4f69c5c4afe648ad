//! Per-chat workflow sessions.
//!
//! At most one [`WorkflowInstance`] exists per (chat, kind). All access goes
//! through [`SessionStore`], which is safe to share between the per-chat
//! workers, background jobs and the idle sweeper.

use crate::message::ChatId;
use crate::workflows::file_convert::FileConvertState;
use crate::workflows::image_to_pdf::ImageToPdfState;
use crate::workflows::merge_pdf::MergeState;
use crate::workflows::resize::ResizeState;
use crate::workspace::ScratchDir;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The seven workflow kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Resize,
    ImageToPdf,
    SplitPdf,
    PdfToImage,
    MergePdf,
    FileConvert,
    Unarchive,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 7] = [
        Self::Resize,
        Self::ImageToPdf,
        Self::SplitPdf,
        Self::PdfToImage,
        Self::MergePdf,
        Self::FileConvert,
        Self::Unarchive,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Resize => "resize",
            Self::ImageToPdf => "image_to_pdf",
            Self::SplitPdf => "split_pdf",
            Self::PdfToImage => "pdf_to_image",
            Self::MergePdf => "merge_pdf",
            Self::FileConvert => "file_convert",
            Self::Unarchive => "unarchive",
        }
    }

    /// Scratch directory name under the workspace root.
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::Resize => "Resize",
            Self::ImageToPdf => "PDF",
            Self::SplitPdf => "Split",
            Self::PdfToImage => "pdf2image",
            Self::MergePdf => "Mergepdf",
            Self::FileConvert => "FileConverter",
            Self::Unarchive => "archive_op",
        }
    }

    /// Human-readable name for user messages.
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Resize => "image resize",
            Self::ImageToPdf => "image to PDF",
            Self::SplitPdf => "PDF split",
            Self::PdfToImage => "PDF to image",
            Self::MergePdf => "PDF merge",
            Self::FileConvert => "file conversion",
            Self::Unarchive => "archive extraction",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a job that runs to completion in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    /// Name of the file being processed, for logs
    pub source_name: String,
}

/// Per-kind workflow state.
#[derive(Debug, Clone)]
pub enum WorkflowState {
    Resize(ResizeState),
    ImageToPdf(ImageToPdfState),
    SplitPdf(JobState),
    PdfToImage(JobState),
    MergePdf(MergeState),
    FileConvert(FileConvertState),
    Unarchive(JobState),
}

macro_rules! state_accessors {
    ($($variant:ident => $ty:ty, $get:ident, $get_mut:ident;)*) => {
        impl WorkflowState {
            $(
                pub fn $get(&self) -> Option<&$ty> {
                    match self {
                        Self::$variant(state) => Some(state),
                        _ => None,
                    }
                }

                pub fn $get_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        Self::$variant(state) => Some(state),
                        _ => None,
                    }
                }
            )*
        }
    };
}

state_accessors! {
    Resize => ResizeState, resize, resize_mut;
    ImageToPdf => ImageToPdfState, image_to_pdf, image_to_pdf_mut;
    MergePdf => MergeState, merge, merge_mut;
    FileConvert => FileConvertState, file_convert, file_convert_mut;
}

impl WorkflowState {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Self::Resize(_) => WorkflowKind::Resize,
            Self::ImageToPdf(_) => WorkflowKind::ImageToPdf,
            Self::SplitPdf(_) => WorkflowKind::SplitPdf,
            Self::PdfToImage(_) => WorkflowKind::PdfToImage,
            Self::MergePdf(_) => WorkflowKind::MergePdf,
            Self::FileConvert(_) => WorkflowKind::FileConvert,
            Self::Unarchive(_) => WorkflowKind::Unarchive,
        }
    }

    /// Whether a long-running step is in progress. Running instances are
    /// never evicted for inactivity.
    pub fn is_running(&self) -> bool {
        match self {
            Self::SplitPdf(_) | Self::PdfToImage(_) | Self::Unarchive(_) => true,
            Self::MergePdf(state) => state.merging,
            Self::FileConvert(state) => matches!(state, FileConvertState::Converting),
            Self::Resize(_) | Self::ImageToPdf(_) => false,
        }
    }
}

/// One live workflow for one chat.
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    /// Unique id, also the scratch directory name
    pub id: String,
    pub state: WorkflowState,
    pub scratch: Arc<ScratchDir>,
    /// Cancelled when the instance is torn down
    pub cancel: CancellationToken,
    pub created_at: Instant,
    pub touched_at: Instant,
}

impl WorkflowInstance {
    pub fn new(id: impl Into<String>, state: WorkflowState, scratch: ScratchDir) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            state,
            scratch: Arc::new(scratch),
            cancel: CancellationToken::new(),
            created_at: now,
            touched_at: now,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.state.kind()
    }
}

/// Concurrent map of live workflow instances keyed by (chat, kind).
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<(ChatId, WorkflowKind), WorkflowInstance>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chat: ChatId, kind: WorkflowKind) -> Option<WorkflowInstance> {
        self.sessions.get(&(chat, kind)).map(|entry| entry.clone())
    }

    pub fn exists(&self, chat: ChatId, kind: WorkflowKind) -> bool {
        self.sessions.contains_key(&(chat, kind))
    }

    /// Insert or replace, returning the replaced instance. The caller is
    /// responsible for cancelling what it gets back.
    pub fn put(&self, chat: ChatId, instance: WorkflowInstance) -> Option<WorkflowInstance> {
        self.sessions.insert((chat, instance.kind()), instance)
    }

    /// Insert only if no instance of the same kind exists. On conflict the
    /// instance is handed back untouched.
    pub fn try_insert(
        &self,
        chat: ChatId,
        instance: WorkflowInstance,
    ) -> Result<(), WorkflowInstance> {
        use dashmap::mapref::entry::Entry;

        match self.sessions.entry((chat, instance.kind())) {
            Entry::Occupied(_) => Err(instance),
            Entry::Vacant(slot) => {
                slot.insert(instance);
                Ok(())
            }
        }
    }

    pub fn remove(&self, chat: ChatId, kind: WorkflowKind) -> Option<WorkflowInstance> {
        self.sessions.remove(&(chat, kind)).map(|(_, instance)| instance)
    }

    /// Remove only if the stored instance is still the one with `instance_id`.
    /// A finished job must not tear down a newer instance that replaced it.
    pub fn remove_if(
        &self,
        chat: ChatId,
        kind: WorkflowKind,
        instance_id: &str,
    ) -> Option<WorkflowInstance> {
        self.sessions
            .remove_if(&(chat, kind), |_, instance| instance.id == instance_id)
            .map(|(_, instance)| instance)
    }

    /// Mutate an instance in place and mark it as touched.
    pub fn update<R>(
        &self,
        chat: ChatId,
        kind: WorkflowKind,
        f: impl FnOnce(&mut WorkflowInstance) -> R,
    ) -> Option<R> {
        let mut entry = self.sessions.get_mut(&(chat, kind))?;
        entry.touched_at = Instant::now();
        Some(f(&mut entry))
    }

    /// Kinds with a live instance for the chat.
    pub fn active_kinds(&self, chat: ChatId) -> Vec<WorkflowKind> {
        WorkflowKind::ALL
            .into_iter()
            .filter(|kind| self.exists(chat, *kind))
            .collect()
    }

    /// Remove and return every instance of the chat.
    pub fn take_chat(&self, chat: ChatId) -> Vec<WorkflowInstance> {
        WorkflowKind::ALL
            .into_iter()
            .filter_map(|kind| self.remove(chat, kind))
            .collect()
    }

    /// Remove and return every instance of every chat.
    pub fn take_all(&self) -> Vec<(ChatId, WorkflowInstance)> {
        let keys: Vec<_> = self.sessions.iter().map(|entry| *entry.key()).collect();
        keys.into_iter()
            .filter_map(|key| self.sessions.remove(&key))
            .map(|((chat, _), instance)| (chat, instance))
            .collect()
    }

    /// Remove instances idle for at least `timeout`, skipping running ones.
    pub fn evict_idle(&self, timeout: Duration) -> Vec<(ChatId, WorkflowInstance)> {
        let idle = |instance: &WorkflowInstance| {
            !instance.state.is_running() && instance.touched_at.elapsed() >= timeout
        };

        let keys: Vec<_> = self
            .sessions
            .iter()
            .filter(|entry| idle(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                self.sessions
                    .remove_if(&key, |_, instance| idle(instance))
                    .map(|((chat, _), instance)| (chat, instance))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;

    fn instance(ws: &Workspace, chat: ChatId, id: &str, state: WorkflowState) -> WorkflowInstance {
        let scratch = ws.scratch(state.kind(), chat, id).unwrap();
        WorkflowInstance::new(id, state, scratch)
    }

    fn job() -> JobState {
        JobState {
            source_name: "a.pdf".into(),
        }
    }

    #[test]
    fn test_put_get_remove() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let store = SessionStore::new();

        assert!(store.put(1, instance(&ws, 1, "a", WorkflowState::SplitPdf(job()))).is_none());
        assert!(store.exists(1, WorkflowKind::SplitPdf));
        assert!(!store.exists(2, WorkflowKind::SplitPdf));
        assert_eq!(store.get(1, WorkflowKind::SplitPdf).unwrap().id, "a");

        let old = store.put(1, instance(&ws, 1, "b", WorkflowState::SplitPdf(job())));
        assert_eq!(old.unwrap().id, "a");
        assert_eq!(store.len(), 1);

        assert!(store.remove(1, WorkflowKind::SplitPdf).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_try_insert_rejects_second_instance() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let store = SessionStore::new();

        store
            .try_insert(1, instance(&ws, 1, "a", WorkflowState::Unarchive(job())))
            .unwrap();
        let rejected = store
            .try_insert(1, instance(&ws, 1, "b", WorkflowState::Unarchive(job())))
            .unwrap_err();
        assert_eq!(rejected.id, "b");
        assert_eq!(store.get(1, WorkflowKind::Unarchive).unwrap().id, "a");
    }

    #[test]
    fn test_remove_if_ignores_stale_id() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let store = SessionStore::new();

        store.put(1, instance(&ws, 1, "new", WorkflowState::PdfToImage(job())));
        assert!(store.remove_if(1, WorkflowKind::PdfToImage, "old").is_none());
        assert!(store.exists(1, WorkflowKind::PdfToImage));
        assert!(store.remove_if(1, WorkflowKind::PdfToImage, "new").is_some());
    }

    #[test]
    fn test_take_chat_leaves_other_chats() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let store = SessionStore::new();

        store.put(1, instance(&ws, 1, "a", WorkflowState::SplitPdf(job())));
        store.put(1, instance(&ws, 1, "b", WorkflowState::Unarchive(job())));
        store.put(2, instance(&ws, 2, "c", WorkflowState::Unarchive(job())));

        let mut kinds = store.active_kinds(1);
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, vec![WorkflowKind::SplitPdf, WorkflowKind::Unarchive]);

        assert_eq!(store.take_chat(1).len(), 2);
        assert!(store.active_kinds(1).is_empty());
        assert!(store.exists(2, WorkflowKind::Unarchive));

        let rest = store.take_all();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_idle_skips_running() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let store = SessionStore::new();

        store.put(1, instance(&ws, 1, "job", WorkflowState::SplitPdf(job())));
        store.put(
            1,
            instance(
                &ws,
                1,
                "idle",
                WorkflowState::ImageToPdf(ImageToPdfState::default()),
            ),
        );

        assert!(store.evict_idle(Duration::from_secs(3600)).is_empty());

        let evicted = store.evict_idle(Duration::ZERO);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].1.id, "idle");
        assert!(store.exists(1, WorkflowKind::SplitPdf));
    }

    #[test]
    fn test_dropping_last_handle_removes_scratch() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::new(root.path());
        let store = SessionStore::new();

        store.put(1, instance(&ws, 1, "a", WorkflowState::Unarchive(job())));
        let held = store.get(1, WorkflowKind::Unarchive).unwrap();
        let path = held.scratch.path().to_path_buf();

        store.remove(1, WorkflowKind::Unarchive);
        assert!(path.exists());
        drop(held);
        assert!(!path.exists());
    }
}
