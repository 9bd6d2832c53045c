use crate::error::ApiError;
use serde::Deserialize;

/// Body of `POST /message/send` and `POST /message/stream`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// The message to run.
    pub message: MessageInput,
    /// Conversation id passed through to the adapter.
    #[serde(default)]
    pub context_id: Option<String>,
    /// Wait for a terminal state before answering. Ignored when streaming.
    #[serde(default = "default_blocking")]
    pub blocking: bool,
}

fn default_blocking() -> bool {
    true
}

/// An inbound message: plain text, or a list of parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageInput {
    /// Bare text.
    Text(String),
    /// A2A-style message object; only `parts` is read.
    Parts {
        /// Message parts in order.
        parts: Vec<MessagePart>,
    },
}

/// One message part. Only text parts carry input; others are skipped.
#[derive(Debug, Deserialize)]
pub struct MessagePart {
    /// Text content, absent for non-text parts.
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageInput {
    /// The text handed to the adapter; text parts are joined by newlines.
    pub fn into_text(self) -> Result<String, ApiError> {
        let text = match self {
            MessageInput::Text(text) => text,
            MessageInput::Parts { parts } => parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest("message has no text content".into()));
        }
        Ok(text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_message() {
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"message": "what is 2+2?"}"#).unwrap();
        assert!(req.blocking);
        assert!(req.context_id.is_none());
        assert_eq!(req.message.into_text().unwrap(), "what is 2+2?");
    }

    #[test]
    fn test_parts_message() {
        let req: SendMessageRequest = serde_json::from_str(
            r#"{
                "message": {"role": "user", "parts": [
                    {"kind": "text", "text": "first"},
                    {"kind": "file", "uri": "file:///tmp/x"},
                    {"kind": "text", "text": "second"}
                ]},
                "contextId": "ctx-9",
                "blocking": false
            }"#,
        )
        .unwrap();
        assert!(!req.blocking);
        assert_eq!(req.context_id.as_deref(), Some("ctx-9"));
        assert_eq!(req.message.into_text().unwrap(), "first\nsecond");
    }

    #[test]
    fn test_empty_message_rejected() {
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"message": {"parts": [{"kind": "file"}]}}"#).unwrap();
        assert!(matches!(
            req.message.into_text(),
            Err(ApiError::BadRequest(_))
        ));
    }
}
