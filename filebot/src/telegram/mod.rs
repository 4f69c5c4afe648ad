//! Telegram channel adapter.
//!
//! Long-polls the Bot API for updates and implements [`Transport`] on top
//! of its HTTP methods.

pub mod parse;

use crate::message::{ChatId, InboundEvent, InlineButton, MessageId};
use crate::traits::{Channel, ChannelError, ChannelResult, TransferObserver, Transport};
use async_trait::async_trait;
use filebot_common::TelegramConfig;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Telegram's limit for a single text message.
const MAX_MESSAGE_LEN: usize = 4096;

/// Telegram's limit for a media caption.
const MAX_CAPTION_LEN: usize = 1024;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Telegram Channel
// ============================================================================

/// Telegram channel - long-polls the Bot API for updates.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    api_base: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: "https://api.telegram.org".into(),
            poll_timeout_secs: 30,
            client: reqwest::Client::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        Self::new(config.bot_token.clone(), config.allowed_users.clone())
            .with_api_base(config.api_base.clone())
            .with_poll_timeout(config.poll_timeout_secs)
    }

    /// Point the channel at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.bot_token)
    }

    fn is_user_allowed(&self, identity: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == identity)
    }

    fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    /// Turn a Bot API response into its `result` field or a typed error.
    async fn read_response(method: &str, resp: reqwest::Response) -> ChannelResult<Value> {
        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Connection(format!("{method}: invalid response: {e}")))?;

        if status.is_success() && data.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("result").cloned().unwrap_or(Value::Null));
        }

        let description = data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();

        match status.as_u16() {
            401 | 403 => Err(ChannelError::Auth(format!("{method}: {description}"))),
            429 => Err(ChannelError::RateLimited {
                retry_after_secs: data
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(Value::as_u64)
                    .unwrap_or(1),
            }),
            _ => Err(ChannelError::SendFailed(format!("{method}: {description}"))),
        }
    }

    /// Call a Bot API method with a JSON body.
    async fn call(&self, method: &str, body: &Value) -> ChannelResult<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        Self::read_response(method, resp).await
    }

    fn message_id_of(method: &str, result: &Value) -> ChannelResult<MessageId> {
        result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChannelError::SendFailed(format!("{method}: missing message_id")))
    }

    async fn send_single_chunk(
        &self,
        chat: ChatId,
        text: &str,
        reply_markup: Option<&Value>,
    ) -> ChannelResult<MessageId> {
        let mut body = json!({
            "chat_id": chat,
            "text": text,
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup.clone();
        }
        let result = self.call("sendMessage", &body).await?;
        Self::message_id_of("sendMessage", &result)
    }

    /// Upload a local file with multipart, streaming it from disk.
    async fn send_file(
        &self,
        method: &str,
        field: &'static str,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> ChannelResult<MessageId> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());

        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length).file_name(file_name.clone());

        let mut form = Form::new().text("chat_id", chat.to_string()).part(field, part);
        if let Some(cap) = caption {
            form = form.text("caption", clip_caption(cap));
        }

        let resp = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let result = Self::read_response(method, resp).await?;
        tracing::info!(chat_id = chat, file_name = %file_name, size = length, "Telegram file sent");
        Self::message_id_of(method, &result)
    }

    /// Fetch one batch of updates starting at `offset`.
    pub async fn poll_updates(&self, offset: i64) -> ChannelResult<Vec<Value>> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let result = self.call("getUpdates", &body).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }
}

fn clip_caption(caption: &str) -> String {
    if caption.chars().count() <= MAX_CAPTION_LEN {
        caption.to_string()
    } else {
        filebot_common::util::truncate_with_ellipsis(caption, MAX_CAPTION_LEN - 3)
    }
}

/// Split a message into chunks that fit within Telegram's limit.
fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }

        let chunk = &remaining[..boundary];
        let split_pos = chunk
            .rfind("\n\n")
            .or_else(|| chunk.rfind('\n'))
            .or_else(|| chunk.rfind(". "))
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        let actual_split = if split_pos == 0 { boundary } else { split_pos };

        chunks.push(remaining[..actual_split].to_string());
        remaining = remaining[actual_split..].trim_start();
    }

    chunks
}

#[async_trait]
impl Transport for TelegramChannel {
    async fn send_text(&self, chat: ChatId, text: &str) -> ChannelResult<MessageId> {
        let mut last_id = None;
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            last_id = Some(self.send_single_chunk(chat, &chunk, None).await?);
        }
        last_id.ok_or_else(|| ChannelError::InvalidMessage("empty message".into()))
    }

    async fn send_text_with_buttons(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[Vec<InlineButton>],
    ) -> ChannelResult<MessageId> {
        let keyboard: Vec<Vec<Value>> = buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|btn| {
                        json!({
                            "text": btn.text,
                            "callback_data": btn.callback_data
                        })
                    })
                    .collect()
            })
            .collect();

        let markup = json!({ "inline_keyboard": keyboard });
        self.send_single_chunk(chat, text, Some(&markup)).await
    }

    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> ChannelResult<MessageId> {
        self.send_file("sendDocument", "document", chat, path, caption).await
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> ChannelResult<MessageId> {
        self.send_file("sendPhoto", "photo", chat, path, caption).await
    }

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> ChannelResult<()> {
        let body = json!({
            "chat_id": chat,
            "message_id": message_id,
            "text": text,
        });
        self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> ChannelResult<()> {
        let body = json!({
            "chat_id": chat,
            "message_id": message_id,
        });
        self.call("deleteMessage", &body).await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> ChannelResult<()> {
        let mut body = json!({
            "callback_query_id": callback_id,
            "show_alert": show_alert
        });
        if let Some(t) = text {
            body["text"] = Value::String(t.to_string());
        }
        self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    async fn download_file(
        &self,
        file_id: &str,
        dest: &Path,
        observer: Option<&dyn TransferObserver>,
    ) -> ChannelResult<u64> {
        // Step 1: Resolve the file path via getFile
        let info = self
            .call("getFile", &json!({ "file_id": file_id }))
            .await
            .map_err(|e| ChannelError::DownloadFailed(e.to_string()))?;
        let file_path = info
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::DownloadFailed("missing file_path in getFile response".into()))?;
        let size_hint = info.get("file_size").and_then(Value::as_u64).unwrap_or(0);

        // Step 2: Stream the file to disk
        let resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ChannelError::DownloadFailed(format!(
                "file download returned {}",
                resp.status()
            )));
        }

        let total = resp.content_length().unwrap_or(size_hint);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ChannelError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(observer) = observer {
                observer.on_progress(written, total).await;
            }
        }
        file.flush().await?;

        tracing::debug!(file_id = %file_id, bytes = written, "Telegram file downloaded");
        Ok(written)
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn init(&mut self) -> ChannelResult<()> {
        // Verify bot token by calling getMe
        let me = self.call("getMe", &json!({})).await.map_err(|e| match e {
            ChannelError::Connection(msg) => ChannelError::Connection(msg),
            other => ChannelError::Auth(format!("Invalid bot token: {other}")),
        })?;

        tracing::info!(
            username = %me.get("username").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "Telegram channel initialized"
        );
        Ok(())
    }

    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for updates...");

        loop {
            let updates = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                polled = self.poll_updates(offset) => polled,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(ChannelError::Auth(msg)) => return Err(ChannelError::Auth(msg)),
                Err(e) => {
                    tracing::warn!(error = %e, "Telegram poll error");
                    let delay = match e {
                        ChannelError::RateLimited { retry_after_secs } => {
                            Duration::from_secs(retry_after_secs)
                        }
                        _ => POLL_RETRY_DELAY,
                    };
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            for update in &updates {
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = offset.max(uid + 1);
                }

                let Some(parsed) = parse::parse_update(update) else {
                    continue;
                };

                if !self.is_any_user_allowed(parsed.identities()) {
                    tracing::warn!(
                        user_id = %parsed.event.user_id,
                        "Telegram: ignoring update from unauthorized user"
                    );
                    continue;
                }

                tracing::info!(
                    channel = "telegram",
                    chat_id = parsed.event.chat_id,
                    user_id = %parsed.event.user_id,
                    shape = ?parsed.event.shape(),
                    "IM event received"
                );
                callback(parsed.event);
            }
        }

        tracing::info!("Telegram listener stopped");
        Ok(())
    }

    async fn health_check(&self) -> ChannelResult<()> {
        match self.call("getMe", &json!({})).await {
            Ok(_) => Ok(()),
            Err(ChannelError::Connection(msg)) => Err(ChannelError::Connection(msg)),
            Err(_) => Err(ChannelError::NotReady),
        }
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        tracing::info!("Telegram channel shutting down");
        self.shutdown.cancel();
        Ok(())
    }
}
