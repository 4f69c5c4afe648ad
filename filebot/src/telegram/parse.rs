//! Bot API update parsing.

use crate::message::{
    parse_command, CallbackInfo, DocumentInfo, EventPayload, InboundEvent, PhotoInfo, PhotoSize,
    ReplyContext,
};
use serde_json::Value;

/// An update that carries an event for a chat.
#[derive(Debug, Clone)]
pub struct ParsedUpdate {
    pub update_id: i64,
    pub event: InboundEvent,
    /// Sender's `@username`, when set
    pub username: Option<String>,
}

impl ParsedUpdate {
    /// Identities the allow-list is matched against.
    pub fn identities(&self) -> Vec<&str> {
        let mut ids = vec![self.event.user_id.as_str()];
        if let Some(name) = self.username.as_deref() {
            ids.push(name);
        }
        ids
    }
}

/// Parse one element of a `getUpdates` result.
///
/// Returns `None` for updates the bot does not act on (edits, stickers,
/// channel posts and the like).
pub fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    let update_id = update.get("update_id")?.as_i64()?;

    if let Some(callback) = update.get("callback_query") {
        return parse_callback(update_id, callback);
    }

    let message = update.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;
    let (user_id, username) = parse_sender(message.get("from"));

    let payload = if let Some(text) = message.get("text").and_then(Value::as_str) {
        match parse_command(text) {
            Some((name, args)) => EventPayload::Command { name, args },
            None => EventPayload::Text {
                text: text.to_string(),
            },
        }
    } else if let Some(doc) = message.get("document") {
        EventPayload::Document(parse_document(doc)?)
    } else if let Some(photo) = message.get("photo") {
        EventPayload::Photo(parse_photo(photo)?)
    } else {
        return None;
    };

    let reply_to = message.get("reply_to_message").and_then(|reply| {
        Some(ReplyContext {
            message_id: reply.get("message_id")?.as_i64()?,
            photo: reply.get("photo").and_then(parse_photo),
            document: reply.get("document").and_then(parse_document),
        })
    });

    Some(ParsedUpdate {
        update_id,
        event: InboundEvent {
            chat_id,
            message_id,
            user_id: user_id.unwrap_or_else(|| chat_id.to_string()),
            payload,
            reply_to,
        },
        username,
    })
}

fn parse_callback(update_id: i64, callback: &Value) -> Option<ParsedUpdate> {
    let id = callback.get("id")?.as_str()?.to_string();
    let data = callback.get("data")?.as_str()?.to_string();
    let (user_id, username) = parse_sender(callback.get("from"));

    let message = callback.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;

    Some(ParsedUpdate {
        update_id,
        event: InboundEvent {
            chat_id,
            message_id,
            user_id: user_id.unwrap_or_else(|| chat_id.to_string()),
            payload: EventPayload::Callback(CallbackInfo { id, data }),
            reply_to: None,
        },
        username,
    })
}

fn parse_sender(from: Option<&Value>) -> (Option<String>, Option<String>) {
    let Some(from) = from else {
        return (None, None);
    };
    let user_id = from.get("id").and_then(Value::as_i64).map(|id| id.to_string());
    let username = from
        .get("username")
        .and_then(Value::as_str)
        .map(String::from);
    (user_id, username)
}

fn parse_document(doc: &Value) -> Option<DocumentInfo> {
    Some(DocumentInfo {
        file_id: doc.get("file_id")?.as_str()?.to_string(),
        file_name: doc.get("file_name").and_then(Value::as_str).map(String::from),
        mime_type: doc.get("mime_type").and_then(Value::as_str).map(String::from),
        file_size: doc.get("file_size").and_then(Value::as_u64).unwrap_or(0),
    })
}

fn parse_photo(photo: &Value) -> Option<PhotoInfo> {
    let sizes: Vec<PhotoSize> = photo
        .as_array()?
        .iter()
        .filter_map(|size| {
            Some(PhotoSize {
                file_id: size.get("file_id")?.as_str()?.to_string(),
                width: u32::try_from(size.get("width")?.as_u64()?).ok()?,
                height: u32::try_from(size.get("height")?.as_u64()?).ok()?,
                file_size: size.get("file_size").and_then(Value::as_u64),
            })
        })
        .collect();

    if sizes.is_empty() {
        None
    } else {
        Some(PhotoInfo { sizes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EventShape;
    use serde_json::json;

    #[test]
    fn test_parse_command_with_bot_mention() {
        let update = json!({
            "update_id": 5,
            "message": {
                "message_id": 11,
                "chat": {"id": 99},
                "from": {"id": 7, "username": "alice"},
                "text": "/splitpdf@filebot"
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.update_id, 5);
        assert_eq!(parsed.event.chat_id, 99);
        assert_eq!(parsed.identities(), vec!["7", "alice"]);
        assert!(matches!(
            &parsed.event.payload,
            EventPayload::Command { name, .. } if name == "splitpdf"
        ));
    }

    #[test]
    fn test_parse_reply_to_photo() {
        let update = json!({
            "update_id": 6,
            "message": {
                "message_id": 12,
                "chat": {"id": 99},
                "from": {"id": 7},
                "text": "/resizeimage",
                "reply_to_message": {
                    "message_id": 10,
                    "photo": [
                        {"file_id": "small", "width": 90, "height": 60},
                        {"file_id": "big", "width": 800, "height": 600, "file_size": 50000}
                    ]
                }
            }
        });
        let parsed = parse_update(&update).unwrap();
        let reply = parsed.event.reply_to.unwrap();
        assert_eq!(reply.message_id, 10);
        assert_eq!(reply.photo.unwrap().largest().unwrap().file_id, "big");
        assert!(reply.document.is_none());
    }

    #[test]
    fn test_parse_document() {
        let update = json!({
            "update_id": 7,
            "message": {
                "message_id": 13,
                "chat": {"id": 1},
                "document": {
                    "file_id": "doc1",
                    "file_name": "a.zip",
                    "mime_type": "application/zip",
                    "file_size": 1234
                }
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.event.shape(), EventShape::Document);
        let doc = parsed.event.document().unwrap();
        assert_eq!(doc.file_size, 1234);
        assert_eq!(doc.mime_type.as_deref(), Some("application/zip"));
        // Falls back to the chat id when the sender is hidden.
        assert_eq!(parsed.event.user_id, "1");
    }

    #[test]
    fn test_parse_callback_query() {
        let update = json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb1",
                "data": "modify_file_size",
                "from": {"id": 7, "username": "alice"},
                "message": {"message_id": 20, "chat": {"id": 99}}
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.event.message_id, 20);
        let cb = parsed.event.callback().unwrap();
        assert_eq!(cb.id, "cb1");
        assert_eq!(cb.data, "modify_file_size");
    }

    #[test]
    fn test_ignores_unsupported_updates() {
        let sticker = json!({
            "update_id": 9,
            "message": {"message_id": 1, "chat": {"id": 1}, "sticker": {"file_id": "x"}}
        });
        assert!(parse_update(&sticker).is_none());

        let edited = json!({"update_id": 10, "edited_message": {"message_id": 1}});
        assert!(parse_update(&edited).is_none());
    }
}
