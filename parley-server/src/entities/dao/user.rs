use chrono::{DateTime, Utc};

/// A row in the `users` table; only populated when auth is enabled.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub external_identity_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub last_login: DateTime<Utc>,
}
