use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    query::UserQuery,
    repo_types::{NewUser, User},
    validation,
};

const USER_COLUMNS: &str = "id, name, email, password_hash, password_changed_at, \
     password_reset_digest, password_reset_expires, role, active, created_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Invalid(String),
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
            _ => StoreError::Other(anyhow::Error::new(err).context("user store query")),
        }
    }
}

/// Options for [`UserStore::save`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Persist even if profile fields would fail validation. Used when only
    /// the active flag changes.
    pub skip_validation: bool,
}

impl SaveOptions {
    pub fn skip_validation() -> Self {
        Self {
            skip_validation: true,
        }
    }
}

/// Profile rules enforced on every validated write.
pub fn validate_user(user: &User) -> Result<(), StoreError> {
    validation::validate_name(&user.name).map_err(StoreError::Invalid)?;
    validation::validate_email(&user.email).map_err(StoreError::Invalid)?;
    Ok(())
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, query: &UserQuery) -> Result<Option<User>, StoreError>;

    async fn list(&self, query: &UserQuery) -> Result<Vec<User>, StoreError>;

    /// Inserts an already-validated account. Duplicate emails yield
    /// [`StoreError::DuplicateEmail`].
    async fn insert(&self, new_user: NewUser) -> Result<User, StoreError>;

    /// Writes the profile fields (name, email, role, active flag) in a single
    /// statement. Credential and reset columns are never touched here.
    async fn write(&self, user: &User) -> Result<User, StoreError>;

    /// Replaces the password digest and drops any reset token, in one update.
    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<User, StoreError>;

    /// Stores the digest and expiry pair for an active user.
    async fn set_reset_token(
        &self,
        id: Uuid,
        digest: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Clears the reset pair only while it still holds `digest`. Returns
    /// whether anything was cleared.
    async fn clear_reset_token(&self, id: Uuid, digest: &str) -> Result<bool, StoreError>;

    /// Sets a new password on the active user holding an unexpired `digest`
    /// and clears the reset pair, as one conditional update. `None` when no
    /// row matched, so a secret can be consumed at most once.
    async fn consume_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.find(&UserQuery::by_id(id)).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find(&UserQuery::by_email(email)).await
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        self.find(&UserQuery::by_reset_digest(digest, now)).await
    }

    async fn save(&self, user: &User, opts: SaveOptions) -> Result<User, StoreError> {
        if !opts.skip_validation {
            validate_user(user)?;
        }
        self.write(user).await
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn select(query: &UserQuery) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
        query.push_filters(&mut qb);
        qb
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find(&self, query: &UserQuery) -> Result<Option<User>, StoreError> {
        let mut qb = Self::select(query);
        qb.push(" LIMIT 1");
        let user = qb.build_query_as::<User>().fetch_optional(&self.db).await?;
        Ok(user)
    }

    async fn list(&self, query: &UserQuery) -> Result<Vec<User>, StoreError> {
        let mut qb = Self::select(query);
        qb.push(" ORDER BY created_at");
        let users = qb.build_query_as::<User>().fetch_all(&self.db).await?;
        Ok(users)
    }

    async fn insert(&self, new_user: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn write(&self, user: &User) -> Result<User, StoreError> {
        let saved = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET name = $2,
                email = $3,
                role = $4,
                active = $5
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role)
        .bind(user.active)
        .fetch_optional(&self.db)
        .await?
        .with_context(|| format!("user {} vanished during save", user.id))?;
        Ok(saved)
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<User, StoreError> {
        let saved = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_changed_at = $3,
                password_reset_digest = NULL,
                password_reset_expires = NULL
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await?
        .with_context(|| format!("user {id} vanished during password change"))?;
        Ok(saved)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        digest: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_reset_digest = $2,
                password_reset_expires = $3
            WHERE id = $1 AND active
            "#,
        )
        .bind(id)
        .bind(digest)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("user {id} vanished before reset token was stored").into());
        }
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid, digest: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_reset_digest = NULL,
                password_reset_expires = NULL
            WHERE id = $1 AND password_reset_digest = $2
            "#,
        )
        .bind(id)
        .bind(digest)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn consume_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                password_changed_at = $4,
                password_reset_digest = NULL,
                password_reset_expires = NULL
            WHERE password_reset_digest = $1
              AND password_reset_expires > $2
              AND active
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(digest)
        .bind(now)
        .bind(password_hash)
        .bind(changed_at)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}
