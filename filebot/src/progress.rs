//! Progress reporting for long-running workflow steps.
//!
//! A [`ProgressCursor`] owns one status message in a chat and keeps it up
//! to date:
//! - **Intermediate progress** → edit the message in place (throttled)
//! - **Stage changes** → `force` an edit, or `replace` the message so it
//!   stays below the files being sent
//!
//! Every edit failure is logged and swallowed. A user deleting the status
//! message must never abort the work it describes.

use crate::message::{ChatId, MessageId};
use crate::traits::{TransferObserver, Transport};
use async_trait::async_trait;
use filebot_common::util::{format_bytes, format_hms};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// Minimum interval between throttled edits.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(1000);

// ============================================================================
// Progress Cursor
// ============================================================================

#[derive(Debug)]
struct CursorState {
    message_id: Option<MessageId>,
    current_text: String,
    last_update: Option<Instant>,
}

/// Handle to a single status message.
pub struct ProgressCursor {
    transport: Arc<dyn Transport>,
    chat: ChatId,
    state: Mutex<CursorState>,
    throttle_interval: Duration,
}

impl ProgressCursor {
    /// Send the initial status message.
    pub async fn start(transport: Arc<dyn Transport>, chat: ChatId, text: &str) -> Self {
        let message_id = match transport.send_text(chat, text).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(chat_id = chat, error = %e, "Failed to send status message");
                None
            }
        };

        Self {
            transport,
            chat,
            state: Mutex::new(CursorState {
                message_id,
                current_text: text.to_string(),
                last_update: None,
            }),
            throttle_interval: DEFAULT_THROTTLE,
        }
    }

    /// Set the throttle interval for [`update`](Self::update).
    pub fn with_throttle(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }

    pub async fn message_id(&self) -> Option<MessageId> {
        self.state.lock().await.message_id
    }

    /// Throttled edit. Dropped when called again within the throttle interval
    /// or when the text is unchanged.
    pub async fn update(&self, text: &str) {
        let mut state = self.state.lock().await;
        if state.current_text == text {
            return;
        }
        if let Some(last) = state.last_update {
            if last.elapsed() < self.throttle_interval {
                tracing::trace!(chat_id = self.chat, "Throttling progress update");
                return;
            }
        }
        self.edit_locked(&mut state, text).await;
    }

    /// Unthrottled edit.
    pub async fn force(&self, text: &str) {
        let mut state = self.state.lock().await;
        if state.current_text == text && state.message_id.is_some() {
            return;
        }
        self.edit_locked(&mut state, text).await;
    }

    /// Delete the status message and send a fresh one with `text`.
    pub async fn replace(&self, text: &str) {
        let mut state = self.state.lock().await;
        if let Some(old) = state.message_id.take() {
            if let Err(e) = self.transport.delete_message(self.chat, old).await {
                tracing::debug!(chat_id = self.chat, error = %e, "Failed to delete status message");
            }
        }
        state.message_id = self.send_new(text).await;
        state.current_text = text.to_string();
        state.last_update = Some(Instant::now());
    }

    /// Remove the status message from the chat.
    pub async fn delete(&self) {
        let mut state = self.state.lock().await;
        if let Some(old) = state.message_id.take() {
            if let Err(e) = self.transport.delete_message(self.chat, old).await {
                tracing::debug!(chat_id = self.chat, error = %e, "Failed to delete status message");
            }
        }
    }

    async fn edit_locked(&self, state: &mut CursorState, text: &str) {
        state.last_update = Some(Instant::now());
        state.current_text = text.to_string();

        match state.message_id {
            Some(id) => {
                if let Err(e) = self.transport.edit_message_text(self.chat, id, text).await {
                    tracing::warn!(
                        chat_id = self.chat,
                        message_id = id,
                        error = %e,
                        "Failed to edit status message"
                    );
                }
            }
            None => {
                state.message_id = self.send_new(text).await;
            }
        }
    }

    async fn send_new(&self, text: &str) -> Option<MessageId> {
        match self.transport.send_text(self.chat, text).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(chat_id = self.chat, error = %e, "Failed to send status message");
                None
            }
        }
    }
}

/// Ten-cell text progress bar.
pub fn progress_bar(percent: f64) -> String {
    let completed = ((percent / 10.0).floor() as usize).min(10);
    format!("[{}{}]", "█".repeat(completed), "░".repeat(10 - completed))
}

fn percent(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        transferred as f64 * 100.0 / total as f64
    }
}

// ============================================================================
// Transfer Observers
// ============================================================================

/// Renders `Label: 42.0%` with a bar.
pub struct PercentObserver<'a> {
    cursor: &'a ProgressCursor,
    label: String,
}

impl<'a> PercentObserver<'a> {
    pub fn new(cursor: &'a ProgressCursor, label: impl Into<String>) -> Self {
        Self {
            cursor,
            label: label.into(),
        }
    }
}

#[async_trait]
impl TransferObserver for PercentObserver<'_> {
    async fn on_progress(&self, transferred: u64, total: u64) {
        if total == 0 {
            return;
        }
        let pct = percent(transferred, total);
        let text = format!("{}: {:.1}%\n{}", self.label, pct, progress_bar(pct));
        self.cursor.update(&text).await;
    }
}

/// Renders percentage, speed, ETA and elapsed time.
pub struct TransferStatsObserver<'a> {
    cursor: &'a ProgressCursor,
    label: String,
    started: Instant,
}

impl<'a> TransferStatsObserver<'a> {
    pub fn new(cursor: &'a ProgressCursor, label: impl Into<String>) -> Self {
        Self {
            cursor,
            label: label.into(),
            started: Instant::now(),
        }
    }
}

/// Format the transfer stats block.
pub fn format_transfer_stats(label: &str, transferred: u64, total: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { transferred as f64 / secs } else { 0.0 };
    let eta = if speed > 0.0 {
        (total.saturating_sub(transferred) as f64 / speed).round() as u64
    } else {
        0
    };

    format!(
        "{label}\nProgress: {:.1}%\nSpeed: {}/s\nETA: {}\nElapsed: {}",
        percent(transferred, total),
        format_bytes(speed as u64),
        format_hms(eta),
        format_hms(elapsed.as_secs()),
    )
}

#[async_trait]
impl TransferObserver for TransferStatsObserver<'_> {
    async fn on_progress(&self, transferred: u64, total: u64) {
        let text = format_transfer_stats(&self.label, transferred, total, self.started.elapsed());
        self.cursor.update(&text).await;
    }
}

// ============================================================================
// Checkpoints from blocking code
// ============================================================================

/// Receives named stages from synchronous backends.
pub trait ProgressSink: Send + Sync {
    fn checkpoint(&self, stage: &str);
}

/// Discards all checkpoints.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn checkpoint(&self, _stage: &str) {}
}

/// Forwards checkpoints over a channel so an async task can render them.
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelProgressSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn checkpoint(&self, stage: &str) {
        // Receiver gone means nobody is rendering; the work itself continues.
        let _ = self.tx.send(stage.to_string());
    }
}
