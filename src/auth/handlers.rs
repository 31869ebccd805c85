use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, PublicUser,
            RegisterRequest, ResetPasswordRequest,
        },
        error::AuthError,
        jwt::{AuthUser, JwtKeys},
        services,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/verify/:token", get(verify))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:token", put(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Map a lifecycle failure to its wire form. Internal failures keep their
/// detail in the logs only.
fn error_response(err: AuthError) -> (StatusCode, String) {
    match &err {
        AuthError::Signing(_) | AuthError::Store(_) | AuthError::Unexpected(_) => {
            error!(error = ?err, "auth operation failed");
            (err.status(), "Server error".to_string())
        }
        _ => (err.status(), err.to_string()),
    }
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();
    payload.username = payload.username.trim().to_string();

    if payload.username.is_empty() {
        warn!("username missing");
        return Err((StatusCode::BAD_REQUEST, "Username is required".into()));
    }

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    if payload.password.len() < 6 {
        warn!("password too short");
        return Err((
            StatusCode::BAD_REQUEST,
            "Please enter a password with 6 or more characters".into(),
        ));
    }

    services::register(
        state.store.as_ref(),
        state.mailer.as_ref(),
        &state.config.base_url,
        &payload.username,
        &payload.email,
        &payload.password,
    )
    .await
    .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            msg: "User registered. Please check your email for verification.".into(),
        }),
    ))
}

#[instrument(skip(state, token))]
pub async fn verify(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    services::verify_email(state.store.as_ref(), &token)
        .await
        .map_err(error_response)?;

    Ok(Json(MessageResponse {
        msg: "Email verified successfully! You can now log in.".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let (token, account) = services::login(
        state.store.as_ref(),
        &keys,
        &payload.email,
        &payload.password,
    )
    .await
    .map_err(error_response)?;

    Ok(Json(AuthResponse {
        token,
        user: PublicUser {
            id: account.id,
            username: account.username,
            email: account.email,
        },
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    services::request_password_reset(
        state.store.as_ref(),
        state.mailer.as_ref(),
        &state.config.base_url,
        &payload.email,
    )
    .await
    .map_err(error_response)?;

    Ok(Json(MessageResponse {
        msg: "Password reset link sent to your email.".into(),
    }))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    if payload.password.len() < 6 {
        warn!("password too short");
        return Err((
            StatusCode::BAD_REQUEST,
            "Please enter a password with 6 or more characters".into(),
        ));
    }

    services::reset_password(state.store.as_ref(), &token, &payload.password)
        .await
        .map_err(error_response)?;

    Ok(Json(MessageResponse {
        msg: "Password reset successfully!".into(),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(account_id): AuthUser,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let account = state
        .store
        .find_by_id(account_id)
        .await
        .map_err(|e| {
            error!(error = %e, account_id = %account_id, "find_by_id failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Server error".into())
        })?
        .ok_or_else(|| {
            warn!(account_id = %account_id, "account behind session token is gone");
            (StatusCode::UNAUTHORIZED, "User not found".to_string())
        })?;

    Ok(Json(PublicUser {
        id: account.id,
        username: account.username,
        email: account.email,
    }))
}
