use std::future::Future;

use chrono::Utc;
use uuid::Uuid;

use crate::entities::{SqliteStore, UserRecord, format_ts, parse_ts};

pub trait UserStore: Send + Sync + 'static {
    /// Look up the user for an external identity, creating it on first sight,
    /// and stamp `last_login`.
    fn record_login(
        &self,
        external_identity_id: &str,
    ) -> impl Future<Output = Result<UserRecord, sqlx::Error>> + Send;
}

type UserRow = (String, String, Option<String>, Option<String>, Option<String>, String);

impl UserStore for SqliteStore {
    async fn record_login(&self, external_identity_id: &str) -> Result<UserRecord, sqlx::Error> {
        let last_login = format_ts(Utc::now());
        let (id, external_identity_id, email, display_name, avatar, last_login): UserRow =
            sqlx::query_as(
                "INSERT INTO users (id, external_identity_id, display_name, last_login) \
                 VALUES (?1, ?2, ?2, ?3) \
                 ON CONFLICT(external_identity_id) DO UPDATE SET last_login = excluded.last_login \
                 RETURNING id, external_identity_id, email, display_name, avatar, last_login",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(external_identity_id)
            .bind(&last_login)
            .fetch_one(&self.pool)
            .await?;

        Ok(UserRecord {
            id,
            external_identity_id,
            email,
            display_name,
            avatar,
            last_login: parse_ts(&last_login, "users.last_login"),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn repeated_logins_keep_the_same_user() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let first = store.record_login("alice").await.unwrap();
        let again = store.record_login("alice").await.unwrap();
        let other = store.record_login("bob").await.unwrap();

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, other.id);
        assert_eq!(first.display_name.as_deref(), Some("alice"));
        assert!(again.last_login >= first.last_login);
    }
}
