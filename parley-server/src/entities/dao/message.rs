use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Author of a message.
///
/// Only `User` and `Assistant` are ever persisted; `System` exists for the
/// custom-instructions preamble prepended to a prompt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A row in the `messages` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: i64,
    pub chat_id: String,
    pub role: Role,
    /// Assistant content is overwritten in place while a turn streams.
    pub content: String,
    /// Gap-free per-chat ordinal starting at 0.
    pub sequence_order: i64,
    pub created_at: DateTime<Utc>,
}
