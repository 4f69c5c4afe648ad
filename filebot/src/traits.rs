//! Channel traits: lifecycle, outbound chat actions, and transfer observation.

use crate::message::{ChatId, InboundEvent, InlineButton, MessageId};
use async_trait::async_trait;
use std::path::Path;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel not ready")]
    NotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Channel lifecycle.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Initialize the channel (connect, authenticate, etc.).
    async fn init(&mut self) -> ChannelResult<()>;

    /// Receive events until shutdown, handing each to the callback in arrival order.
    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundEvent) + Send + Sync + 'static;

    /// Check if the channel is healthy.
    async fn health_check(&self) -> ChannelResult<()>;

    /// Shutdown the channel gracefully.
    async fn shutdown(&self) -> ChannelResult<()>;
}

/// Outbound actions the workflows perform against a chat.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message, returning its id.
    async fn send_text(&self, chat: ChatId, text: &str) -> ChannelResult<MessageId>;

    /// Send a text message with an inline keyboard. Each inner vec is one row.
    async fn send_text_with_buttons(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[Vec<InlineButton>],
    ) -> ChannelResult<MessageId>;

    /// Upload a local file as a document. The file name is taken from the path.
    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> ChannelResult<MessageId>;

    /// Upload a local image as a photo.
    async fn send_photo(
        &self,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> ChannelResult<MessageId>;

    /// Replace the text of an existing message.
    async fn edit_message_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> ChannelResult<()>;

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> ChannelResult<()>;

    /// Acknowledge an inline button press.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> ChannelResult<()>;

    /// Download a remote file into `dest`, returning the number of bytes written.
    async fn download_file(
        &self,
        file_id: &str,
        dest: &Path,
        observer: Option<&dyn TransferObserver>,
    ) -> ChannelResult<u64>;
}

/// Receives byte counts while a file is transferred.
#[async_trait]
pub trait TransferObserver: Send + Sync {
    /// `total` is zero when the size is unknown.
    async fn on_progress(&self, transferred: u64, total: u64);
}
