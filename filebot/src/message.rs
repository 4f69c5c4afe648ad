//! Inbound event model shared by the transport and the workflows.

use serde::{Deserialize, Serialize};

/// Chat identifier as assigned by the messaging platform.
pub type ChatId = i64;

/// Message identifier, unique within a chat.
pub type MessageId = i64;

/// A single event received from a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Chat the event belongs to
    pub chat_id: ChatId,
    /// Message that carried the event (for callbacks, the message holding the buttons)
    pub message_id: MessageId,
    /// Sender identifier
    pub user_id: String,
    /// Event payload
    pub payload: EventPayload,
    /// Message this one replies to, if any
    #[serde(default)]
    pub reply_to: Option<ReplyContext>,
}

/// What the event carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// `/name args`
    Command { name: String, args: String },
    /// Plain text
    Text { text: String },
    /// File sent as a document
    Document(DocumentInfo),
    /// Compressed photo, all available sizes
    Photo(PhotoInfo),
    /// Inline button press
    Callback(CallbackInfo),
}

/// The broad shape of an event, used by workflows to declare what they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventShape {
    Command,
    Text,
    Document,
    Photo,
    Callback,
}

/// Document metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: u64,
}

impl DocumentInfo {
    /// Lowercased extension of the file name, including the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let dot = name.rfind('.')?;
        Some(name[dot..].to_lowercase())
    }

    /// Whether the document looks like a PDF by name or MIME type.
    pub fn is_pdf(&self) -> bool {
        self.extension().as_deref() == Some(".pdf")
            || self.mime_type.as_deref() == Some("application/pdf")
    }
}

/// One rendition of a photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// All renditions of a photo as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoInfo {
    pub sizes: Vec<PhotoSize>,
}

impl PhotoInfo {
    /// The highest-resolution rendition.
    pub fn largest(&self) -> Option<&PhotoSize> {
        self.sizes
            .iter()
            .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
    }
}

/// Inline button press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackInfo {
    /// Callback query id, needed to acknowledge the press
    pub id: String,
    /// Button payload
    pub data: String,
}

/// The parent of a reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyContext {
    pub message_id: MessageId,
    #[serde(default)]
    pub photo: Option<PhotoInfo>,
    #[serde(default)]
    pub document: Option<DocumentInfo>,
}

/// Inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InboundEvent {
    /// Shape of the payload.
    pub fn shape(&self) -> EventShape {
        match self.payload {
            EventPayload::Command { .. } => EventShape::Command,
            EventPayload::Text { .. } => EventShape::Text,
            EventPayload::Document(_) => EventShape::Document,
            EventPayload::Photo(_) => EventShape::Photo,
            EventPayload::Callback(_) => EventShape::Callback,
        }
    }

    /// Text content. Unknown commands are treated as text, so the raw
    /// command line is returned for them too.
    pub fn text(&self) -> Option<String> {
        match &self.payload {
            EventPayload::Text { text } => Some(text.clone()),
            EventPayload::Command { name, args } if args.is_empty() => Some(format!("/{name}")),
            EventPayload::Command { name, args } => Some(format!("/{name} {args}")),
            _ => None,
        }
    }

    pub fn document(&self) -> Option<&DocumentInfo> {
        match &self.payload {
            EventPayload::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn photo(&self) -> Option<&PhotoInfo> {
        match &self.payload {
            EventPayload::Photo(photo) => Some(photo),
            _ => None,
        }
    }

    pub fn callback(&self) -> Option<&CallbackInfo> {
        match &self.payload {
            EventPayload::Callback(cb) => Some(cb),
            _ => None,
        }
    }
}

/// Split `/name@bot args` into a lowercased command name and its arguments.
///
/// Returns `None` when the text is not a command.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or_default();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name.to_lowercase(), args.to_string()))
}
