use chrono::{DateTime, Utc};

/// A row in the `chats` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRecord {
    pub id: String,
    /// Owning user; `None` in single-user deployments.
    pub user_id: Option<String>,
    pub title: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    /// Bumped on every appended message and every title edit.
    pub updated_at: DateTime<Utc>,
}
