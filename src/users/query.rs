use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::User;

/// Explicit filter for user lookups.
///
/// Every query excludes deactivated accounts unless [`UserQuery::include_inactive`]
/// is called. The same filter is rendered to SQL by the Postgres store and
/// evaluated in memory by the test store, so both agree on what "found" means.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    id: Option<Uuid>,
    email: Option<String>,
    reset_digest: Option<String>,
    reset_valid_at: Option<OffsetDateTime>,
    include_inactive: bool,
}

impl UserQuery {
    /// All active users.
    pub fn active() -> Self {
        Self::default()
    }

    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_email(email: &str) -> Self {
        Self {
            email: Some(email.trim().to_lowercase()),
            ..Self::default()
        }
    }

    /// Users whose stored reset digest matches and whose reset window is
    /// still open at `now`.
    pub fn by_reset_digest(digest: &str, now: OffsetDateTime) -> Self {
        Self {
            reset_digest: Some(digest.to_string()),
            reset_valid_at: Some(now),
            ..Self::default()
        }
    }

    pub fn include_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    pub fn matches(&self, user: &User) -> bool {
        if !self.include_inactive && !user.active {
            return false;
        }
        if let Some(id) = self.id {
            if user.id != id {
                return false;
            }
        }
        if let Some(email) = &self.email {
            if &user.email != email {
                return false;
            }
        }
        if let Some(digest) = &self.reset_digest {
            if user.password_reset_digest.as_deref() != Some(digest.as_str()) {
                return false;
            }
        }
        if let Some(now) = self.reset_valid_at {
            match user.password_reset_expires {
                Some(expires) if expires > now => {}
                _ => return false,
            }
        }
        true
    }

    /// Appends a `WHERE` clause equivalent to [`UserQuery::matches`].
    pub fn push_filters(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");
        if !self.include_inactive {
            qb.push(" AND active");
        }
        if let Some(id) = self.id {
            qb.push(" AND id = ").push_bind(id);
        }
        if let Some(email) = &self.email {
            qb.push(" AND email = ").push_bind(email.clone());
        }
        if let Some(digest) = &self.reset_digest {
            qb.push(" AND password_reset_digest = ").push_bind(digest.clone());
        }
        if let Some(now) = self.reset_valid_at {
            qb.push(" AND password_reset_expires > ").push_bind(now);
        }
    }
}
