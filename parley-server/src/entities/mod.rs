//! Persistence layer.
//!
//! Each concern gets its own store trait ([`ChatStore`], [`MessageStore`],
//! [`SettingStore`], [`UserStore`]); [`SqliteStore`] implements all of them.
//! Handlers and the turn coordinator only see the traits, so another backend
//! can be dropped in by implementing them and changing the concrete type in
//! [`crate::state::AppState`].
//!
//! Trait methods return `impl Future + Send` so callers can hold them across
//! `tokio::spawn`.

pub mod chat;
pub mod dao;
pub mod message;
pub mod setting;
pub mod user;

pub use dao::{ChatRecord, MessageRecord, Role, UserRecord};

pub use chat::ChatStore;
pub use message::MessageStore;
pub use setting::SettingStore;
pub use user::UserStore;

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// SQLite-backed store for chats, messages, settings and users.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://parley.db"`
    /// or `"sqlite::memory:"` for tests. In-memory databases are pinned to a
    /// single long-lived connection, otherwise every pooled connection would
    /// see its own empty database.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = if is_in_memory(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

// ── timestamp helpers ─────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so that `ORDER BY` on the text column is chronological.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str, field: &'static str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, error = %e, field, "failed to parse timestamp; using now");
        Utc::now()
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_urls_are_detected() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://:memory:"));
        assert!(is_in_memory("sqlite:file:parley?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://parley.db"));
    }

    #[test]
    fn timestamps_round_trip_and_sort() {
        let early = "2026-01-01T00:00:00.5Z".parse::<DateTime<Utc>>().unwrap();
        let late = "2026-01-01T00:00:00.123456Z".parse::<DateTime<Utc>>().unwrap()
            + chrono::Duration::seconds(1);
        assert!(format_ts(early) < format_ts(late));
        assert_eq!(parse_ts(&format_ts(early), "t"), early);
    }

    #[tokio::test]
    async fn in_memory_store_runs_migrations() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('chats', 'messages', 'settings', 'users')",
        )
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(n, 4);
    }
}
