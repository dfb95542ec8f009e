use std::future::Future;

use chrono::Utc;

use crate::entities::{MessageRecord, Role, SqliteStore, format_ts, parse_ts};

pub trait MessageStore: Send + Sync + 'static {
    /// Append a message at the next free sequence number of `chat_id` and
    /// bump the chat's `updated_at`.
    fn append_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
    ) -> impl Future<Output = Result<MessageRecord, sqlx::Error>> + Send;

    /// Overwrite the full content of a message. Returns `false` when the row
    /// no longer exists.
    fn update_message_content(
        &self,
        id: i64,
        content: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Messages of `chat_id` in sequence order.
    fn list_messages(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, sqlx::Error>> + Send;

    #[cfg(test)]
    fn get_message(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<MessageRecord>, sqlx::Error>> + Send;
}

type MessageRow = (i64, String, String, String, i64, String);

fn message_from_row(
    (id, chat_id, role, content, sequence_order, created_at): MessageRow,
) -> Result<MessageRecord, sqlx::Error> {
    let role = role
        .parse::<Role>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(MessageRecord {
        id,
        chat_id,
        role,
        content,
        sequence_order,
        created_at: parse_ts(&created_at, "messages.created_at"),
    })
}

impl MessageStore for SqliteStore {
    async fn append_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
    ) -> Result<MessageRecord, sqlx::Error> {
        let now = Utc::now();
        let ts = format_ts(now);
        let mut tx = self.pool.begin().await?;

        // Allocating the sequence number inside the INSERT keeps it atomic;
        // the (chat_id, sequence_order) unique index rejects any duplicate.
        let (id, sequence_order): (i64, i64) = sqlx::query_as(
            "INSERT INTO messages (chat_id, role, content, sequence_order, created_at) \
             SELECT ?1, ?2, ?3, COALESCE(MAX(sequence_order) + 1, 0), ?4 \
             FROM messages WHERE chat_id = ?1 \
             RETURNING id, sequence_order",
        )
        .bind(chat_id)
        .bind(role.as_ref())
        .bind(content)
        .bind(&ts)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE chats SET updated_at = ?1 WHERE id = ?2")
            .bind(&ts)
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(MessageRecord {
            id,
            chat_id: chat_id.to_owned(),
            role,
            content: content.to_owned(),
            sequence_order,
            created_at: now,
        })
    }

    async fn update_message_content(&self, id: i64, content: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE messages SET content = ?1 WHERE id = ?2")
            .bind(content)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, role, content, sequence_order, created_at \
             FROM messages WHERE chat_id = ?1 ORDER BY sequence_order ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    #[cfg(test)]
    async fn get_message(&self, id: i64) -> Result<Option<MessageRecord>, sqlx::Error> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, role, content, sequence_order, created_at \
             FROM messages WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(message_from_row).transpose()
    }
}
