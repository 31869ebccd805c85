use axum::http::StatusCode;
use thiserror::Error;

use crate::auth::store::StoreError;

/// Failure kinds of the account lifecycle operations. The `#[error]` texts
/// are the user-safe messages; anything internal stays in the logs.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("User already exists")]
    DuplicateAccount,
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    /// Deliberately covers both "no such account" and "wrong password" so
    /// responses do not reveal which emails are registered.
    #[error("Invalid Credentials")]
    InvalidCredentials,
    #[error("Please verify your email first.")]
    NotVerified,
    /// Forgot-password reports a missing account outright. This mirrors
    /// login's anti-enumeration behavior imperfectly on purpose.
    #[error("User not found")]
    AccountNotFound,
    #[error("failed to sign session token")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::DuplicateAccount => StatusCode::CONFLICT,
            AuthError::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::NotVerified => StatusCode::FORBIDDEN,
            AuthError::AccountNotFound => StatusCode::NOT_FOUND,
            AuthError::Signing(_) | AuthError::Store(_) | AuthError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
