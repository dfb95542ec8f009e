use std::future::Future;

use chrono::Utc;
use uuid::Uuid;

use crate::entities::{ChatRecord, SqliteStore, format_ts, parse_ts};

pub trait ChatStore: Send + Sync + 'static {
    fn create_chat(
        &self,
        user_id: Option<&str>,
        title: &str,
        model: &str,
    ) -> impl Future<Output = Result<ChatRecord, sqlx::Error>> + Send;

    fn get_chat(&self, id: &str)
    -> impl Future<Output = Result<Option<ChatRecord>, sqlx::Error>> + Send;

    /// Chats owned by `user_id`, most recently updated first.
    fn list_chats(
        &self,
        user_id: Option<&str>,
    ) -> impl Future<Output = Result<Vec<ChatRecord>, sqlx::Error>> + Send;

    /// The most recently created chat of `user_id` that has no messages.
    fn find_empty_chat(
        &self,
        user_id: Option<&str>,
    ) -> impl Future<Output = Result<Option<ChatRecord>, sqlx::Error>> + Send;

    /// Returns `false` when no such chat exists.
    fn update_chat_title(
        &self,
        id: &str,
        title: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Deletes the chat and, through the foreign key, all of its messages.
    /// Returns `false` when no such chat exists.
    fn delete_chat(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
}

type ChatRow = (String, Option<String>, String, String, String, String);

const CHAT_COLUMNS: &str = "c.id, c.user_id, c.title, c.model, c.created_at, c.updated_at";

fn chat_from_row((id, user_id, title, model, created_at, updated_at): ChatRow) -> ChatRecord {
    ChatRecord {
        id,
        user_id,
        title,
        model,
        created_at: parse_ts(&created_at, "chats.created_at"),
        updated_at: parse_ts(&updated_at, "chats.updated_at"),
    }
}

impl ChatStore for SqliteStore {
    async fn create_chat(
        &self,
        user_id: Option<&str>,
        title: &str,
        model: &str,
    ) -> Result<ChatRecord, sqlx::Error> {
        let now = Utc::now();
        let record = ChatRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.map(str::to_owned),
            title: title.to_owned(),
            model: model.to_owned(),
            created_at: now,
            updated_at: now,
        };
        let ts = format_ts(now);
        sqlx::query(
            "INSERT INTO chats (id, user_id, title, model, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.title)
        .bind(&record.model)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_chat(&self, id: &str) -> Result<Option<ChatRecord>, sqlx::Error> {
        let row: Option<ChatRow> =
            sqlx::query_as(&format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(chat_from_row))
    }

    async fn list_chats(&self, user_id: Option<&str>) -> Result<Vec<ChatRecord>, sqlx::Error> {
        // `IS` compares NULL owners as equal, which is what single-user mode needs.
        let rows: Vec<ChatRow> = sqlx::query_as(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats c WHERE c.user_id IS ?1 \
             ORDER BY c.updated_at DESC, c.rowid DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(chat_from_row).collect())
    }

    async fn find_empty_chat(&self, user_id: Option<&str>) -> Result<Option<ChatRecord>, sqlx::Error> {
        let row: Option<ChatRow> = sqlx::query_as(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats c \
             LEFT JOIN messages m ON m.chat_id = c.id \
             WHERE m.id IS NULL AND c.user_id IS ?1 \
             ORDER BY c.created_at DESC, c.rowid DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(chat_from_row))
    }

    async fn update_chat_title(&self, id: &str, title: &str) -> Result<bool, sqlx::Error> {
        let updated_at = format_ts(Utc::now());
        let result = sqlx::query("UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(title)
            .bind(&updated_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_chat(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM chats WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
