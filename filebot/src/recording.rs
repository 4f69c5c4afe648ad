//! In-memory transport that records every outbound action.
//!
//! Downloads are served from registered byte buffers. Used by the test
//! suites and handy for driving workflows without a network.

use crate::message::{ChatId, InlineButton, MessageId};
use crate::traits::{ChannelError, ChannelResult, TransferObserver, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

/// One recorded outbound action.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text {
        chat: ChatId,
        message_id: MessageId,
        text: String,
    },
    Buttons {
        chat: ChatId,
        message_id: MessageId,
        text: String,
        buttons: Vec<Vec<InlineButton>>,
    },
    Document {
        chat: ChatId,
        message_id: MessageId,
        file_name: String,
        caption: Option<String>,
        bytes: Vec<u8>,
    },
    Photo {
        chat: ChatId,
        message_id: MessageId,
        file_name: String,
        caption: Option<String>,
        bytes: Vec<u8>,
    },
    Edit {
        chat: ChatId,
        message_id: MessageId,
        text: String,
    },
    Delete {
        chat: ChatId,
        message_id: MessageId,
    },
    Answer {
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    },
}

type SendHook = Box<dyn Fn() + Send + Sync>;

/// Recording [`Transport`] implementation.
#[derive(Default)]
pub struct RecordingTransport {
    log: Mutex<Vec<Outbound>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    stalled: Mutex<HashSet<String>>,
    on_document: Mutex<Option<SendHook>>,
    fail_edits: AtomicBool,
    next_id: AtomicI64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            ..Default::default()
        }
    }

    /// Make `file_id` downloadable with the given contents.
    pub fn register_file(&self, file_id: impl Into<String>, bytes: Vec<u8>) {
        self.lock_files().insert(file_id.into(), bytes);
    }

    /// Make downloads of `file_id` hang until the caller gives up on them.
    pub fn stall_download(&self, file_id: impl Into<String>) {
        self.lock_stalled().insert(file_id.into());
    }

    /// Run `hook` after every recorded document, e.g. to cancel mid-loop.
    pub fn on_document(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_document.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    /// Make every edit fail, as when the message was deleted by the user.
    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every recorded action.
    pub fn actions(&self) -> Vec<Outbound> {
        self.lock_log().clone()
    }

    /// Texts of plain and button messages, in order.
    pub fn texts(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Outbound::Text { text, .. } | Outbound::Buttons { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Texts of plain, button and edited messages, in order.
    pub fn all_texts(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Outbound::Text { text, .. }
                | Outbound::Buttons { text, .. }
                | Outbound::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Uploaded documents as (file name, caption, bytes).
    pub fn documents(&self) -> Vec<(String, Option<String>, Vec<u8>)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Outbound::Document {
                    file_name,
                    caption,
                    bytes,
                    ..
                } => Some((file_name, caption, bytes)),
                _ => None,
            })
            .collect()
    }

    /// Uploaded photos as (file name, caption, bytes).
    pub fn photos(&self) -> Vec<(String, Option<String>, Vec<u8>)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Outbound::Photo {
                    file_name,
                    caption,
                    bytes,
                    ..
                } => Some((file_name, caption, bytes)),
                _ => None,
            })
            .collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }

    pub fn clear(&self) {
        self.lock_log().clear();
    }

    fn record(&self, action: Outbound) {
        self.lock_log().push(action);
    }

    fn next_message_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    // Poisoning only happens if a test already panicked while holding the lock.
    fn lock_log(&self) -> std::sync::MutexGuard<'_, Vec<Outbound>> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_files(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_stalled(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.stalled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, chat: ChatId, text: &str) -> ChannelResult<MessageId> {
        let message_id = self.next_message_id();
        self.record(Outbound::Text {
            chat,
            message_id,
            text: text.to_string(),
        });
        Ok(message_id)
    }

    async fn send_text_with_buttons(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[Vec<InlineButton>],
    ) -> ChannelResult<MessageId> {
        let message_id = self.next_message_id();
        self.record(Outbound::Buttons {
            chat,
            message_id,
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
        Ok(message_id)
    }

    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> ChannelResult<MessageId> {
        let bytes = tokio::fs::read(path).await?;
        let message_id = self.next_message_id();
        self.record(Outbound::Document {
            chat,
            message_id,
            file_name: file_name_of(path),
            caption: caption.map(str::to_string),
            bytes,
        });
        if let Some(hook) = self.on_document.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            hook();
        }
        Ok(message_id)
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> ChannelResult<MessageId> {
        let bytes = tokio::fs::read(path).await?;
        let message_id = self.next_message_id();
        self.record(Outbound::Photo {
            chat,
            message_id,
            file_name: file_name_of(path),
            caption: caption.map(str::to_string),
            bytes,
        });
        Ok(message_id)
    }

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> ChannelResult<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("message to edit not found".into()));
        }
        self.record(Outbound::Edit {
            chat,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> ChannelResult<()> {
        self.record(Outbound::Delete { chat, message_id });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> ChannelResult<()> {
        self.record(Outbound::Answer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            show_alert,
        });
        Ok(())
    }

    async fn download_file(
        &self,
        file_id: &str,
        dest: &Path,
        observer: Option<&dyn TransferObserver>,
    ) -> ChannelResult<u64> {
        if self.lock_stalled().contains(file_id) {
            std::future::pending::<()>().await;
        }

        let bytes = self
            .lock_files()
            .get(file_id)
            .cloned()
            .ok_or_else(|| ChannelError::DownloadFailed(format!("unknown file id {file_id}")))?;

        let total = bytes.len() as u64;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;

        if let Some(observer) = observer {
            observer.on_progress(total / 2, total).await;
            observer.on_progress(total, total).await;
        }
        Ok(total)
    }
}
