use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::entities::{ChatRecord, MessageRecord};
use crate::turn::StreamEvent;

/// Upper bound on a single user message (128 KiB of characters).
pub const MAX_MESSAGE_CHARS: u64 = 128 * 1024;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ChatTurnRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = MAX_MESSAGE_CHARS, message = "Message is required and must be at most 128 KiB"))]
    pub message: String,
    /// Defaults to the server's configured model.
    #[serde(default)]
    pub model: Option<String>,
    /// Omit to continue the caller's empty chat or start a new one.
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct CreateChatRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateChatRequest {
    /// Leaving it out makes the request a plain fetch.
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: i64,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub sequence_order: i64,
    pub created_at: String,
}

/// A chat with its messages in sequence order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub id: String,
    pub title: String,
    pub model: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteChatResponse {
    pub success: bool,
}

impl From<MessageRecord> for MessageResponse {
    fn from(m: MessageRecord) -> Self {
        Self {
            id: m.id,
            chat_id: m.chat_id,
            role: m.role.to_string(),
            content: m.content,
            sequence_order: m.sequence_order,
            created_at: m.created_at.to_rfc3339(),
        }
    }
}

impl ChatResponse {
    pub fn new(chat: ChatRecord, messages: Vec<MessageRecord>) -> Self {
        Self {
            id: chat.id,
            title: chat.title,
            model: chat.model,
            created_at: chat.created_at.to_rfc3339(),
            updated_at: chat.updated_at.to_rfc3339(),
            messages: messages.into_iter().map(MessageResponse::from).collect(),
        }
    }
}

// ── wire frames ──────────────────────────────────────────────────────────────

/// JSON payload of one SSE `data:` line.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum StreamFrame {
    Content { content: String },
    Done { done: bool, chat_id: String },
    Error { error: String },
}

impl From<StreamEvent> for StreamFrame {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Content(content) => StreamFrame::Content { content },
            StreamEvent::Done { chat_id } => StreamFrame::Done { done: true, chat_id },
            StreamEvent::Error(error) => StreamFrame::Error { error },
        }
    }
}
