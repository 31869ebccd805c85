use axum::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{Account, NewAccount};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violation")]
    ConstraintViolation,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence contract for accounts. Token consumption is a single
/// conditional update: the matching row is mutated and returned in one
/// statement, so two concurrent consumptions of the same token cannot
/// both succeed.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Insert a fresh unverified account. Fails with `ConstraintViolation`
    /// if the email or username is already taken.
    async fn create(&self, new: NewAccount<'_>) -> Result<Account, StoreError>;

    /// Mark the account holding this verification token as verified and
    /// clear the token. Returns `None` when no row matches — unknown and
    /// already-consumed tokens are indistinguishable.
    async fn consume_verification_token(&self, token: &str)
        -> Result<Option<Account>, StoreError>;

    async fn store_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Replace the password hash of the account holding this reset token,
    /// provided the token has not expired, and clear the token pair.
    /// Returns `None` for unknown, consumed and expired tokens alike.
    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
    ) -> Result<Option<Account>, StoreError>;
}

pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, username, email, password_hash, verified,
                   verification_token, reset_token, reset_token_expires_at, created_at
            FROM accounts
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, username, email, password_hash, verified,
                   verification_token, reset_token, reset_token_expires_at, created_at
            FROM accounts
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, username, email, password_hash, verified,
                   verification_token, reset_token, reset_token_expires_at, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    async fn create(&self, new: NewAccount<'_>) -> Result<Account, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (username, email, password_hash, verification_token)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash, verified,
                      verification_token, reset_token, reset_token_expires_at, created_at
            "#,
        )
        .bind(new.username)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.verification_token)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => StoreError::ConstraintViolation,
            _ => StoreError::Database(e),
        })?;
        Ok(account)
    }

    async fn consume_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET verified = TRUE, verification_token = NULL
            WHERE verification_token = $1
            RETURNING id, username, email, password_hash, verified,
                      verification_token, reset_token, reset_token_expires_at, created_at
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    async fn store_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET reset_token = $2, reset_token_expires_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
    ) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET password_hash = $3, reset_token = NULL, reset_token_expires_at = NULL
            WHERE reset_token = $1 AND reset_token_expires_at > $2
            RETURNING id, username, email, password_hash, verified,
                      verification_token, reset_token, reset_token_expires_at, created_at
            "#,
        )
        .bind(token)
        .bind(now)
        .bind(new_password_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }
}
