use std::future::Future;

use chrono::Utc;

use crate::entities::{SqliteStore, format_ts};

/// Key under which the system-prompt preamble is stored.
pub const CUSTOM_INSTRUCTIONS_KEY: &str = "custom_instructions";

/// Key/value settings, scoped to a user or global when `user_id` is `None`.
pub trait SettingStore: Send + Sync + 'static {
    fn get_setting(
        &self,
        user_id: Option<&str>,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, sqlx::Error>> + Send;

    /// Insert or replace the value of `key`.
    fn set_setting(
        &self,
        user_id: Option<&str>,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

impl SettingStore for SqliteStore {
    async fn get_setting(
        &self,
        user_id: Option<&str>,
        key: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM settings WHERE user_id IS ?1 AND key = ?2")
                .bind(user_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn set_setting(
        &self,
        user_id: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<(), sqlx::Error> {
        let updated_at = format_ts(Utc::now());
        let mut tx = self.pool.begin().await?;

        // The unique index is on an expression, so upsert as update-then-insert
        // inside one transaction instead of `ON CONFLICT`.
        let updated = sqlx::query(
            "UPDATE settings SET value = ?1, updated_at = ?2 WHERE user_id IS ?3 AND key = ?4",
        )
        .bind(value)
        .bind(&updated_at)
        .bind(user_id)
        .bind(key)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO settings (user_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(user_id)
            .bind(key)
            .bind(value)
            .bind(&updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
