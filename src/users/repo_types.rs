use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Authorization roles, stored as the `user_role` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "user_role", rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,                              // always lower-cased
    pub password_hash: String,                      // Argon2 PHC string
    pub password_changed_at: Option<OffsetDateTime>,
    pub password_reset_digest: Option<String>,      // SHA-256 hex of the emailed secret
    pub password_reset_expires: Option<OffsetDateTime>,
    pub role: Role,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

/// Fields needed to insert a fresh account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

impl User {
    /// True when the password was changed at or after `issued_at` (unix seconds),
    /// meaning a token carrying that `iat` has been superseded.
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .map(|changed| changed.unix_timestamp() >= issued_at)
            .unwrap_or(false)
    }
}

/// Value stored in `password_changed_at` for a change made at `now`.
///
/// Backdated by one second so a token signed in the same instant (auto-login
/// after a reset or password update) is not treated as superseded. Since `iat`
/// has one-second resolution, a token issued earlier within the same second as
/// the change also stays valid.
pub fn password_change_stamp(now: OffsetDateTime) -> OffsetDateTime {
    now - Duration::seconds(1)
}
