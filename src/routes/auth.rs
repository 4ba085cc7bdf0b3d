//! `/api/auth`: registration, sessions, password reset, profile updates.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    auth::{
        AuthUser, PasswordDigest, clear_session_cookie, mint_token, session_cookie, verify_token,
    },
    error::AppError,
    models::User,
    state::AppState,
};

use super::{profile, sync_user_index, with_user};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 30;
const PASSWORD_MIN: usize = 8;
const BIO_MAX: usize = 500;

/// Reset tokens are short-lived, unlike session tokens.
const RESET_TOKEN_DAYS: i64 = 1;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/profile", put(update_profile))
}

fn check_username(username: &str) -> Result<(), AppError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(AppError::InvalidArgument(format!(
            "Username must be {USERNAME_MIN} to {USERNAME_MAX} characters"
        )));
    }

    Ok(())
}

fn check_email(email: &str) -> Result<(), AppError> {
    if !email.contains('@') {
        return Err(AppError::InvalidArgument(
            "Invalid email address".to_string(),
        ));
    }

    Ok(())
}

fn check_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(AppError::InvalidArgument(format!(
            "Password must be at least {PASSWORD_MIN} characters"
        )));
    }

    Ok(())
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = body.username.trim().to_string();
    let email = body.email.trim().to_lowercase();

    check_username(&username)?;
    check_email(&email)?;
    check_password(&body.password)?;

    let user = User::new(username, email, PasswordDigest::new(&body.password));
    state.store.insert_user(&user).await?;

    sync_user_index(&state, &user).await;

    let token = mint_token(user.id, &state.config.auth_secret, state.config.token_days)?;
    let counters = state.store.counters(user.id).await?;

    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, session_cookie(&token, state.config.token_days))],
        Json(json!({
            "success": true,
            "user": profile(user, counters),
            "token": token,
        })),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Unknown email and wrong password answer identically, so login responses
/// never confirm whether an account exists.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = body.email.trim().to_lowercase();

    let user = state
        .store
        .user_by_email(&email)
        .await?
        .ok_or(AppError::Unauthorized("Invalid credentials"))?;

    if !user.doc.password.verify(&body.password) {
        return Err(AppError::Unauthorized("Invalid credentials"));
    }

    let token = mint_token(
        user.doc.id,
        &state.config.auth_secret,
        state.config.token_days,
    )?;
    let counters = state.store.counters(user.doc.id).await?;

    Ok((
        [(SET_COOKIE, session_cookie(&token, state.config.token_days))],
        Json(json!({
            "success": true,
            "user": profile(user.doc, counters),
            "token": token,
        })),
    ))
}

async fn logout() -> impl IntoResponse {
    (
        [(SET_COOKIE, clear_session_cookie())],
        Json(json!({ "success": true, "message": "Logged out successfully" })),
    )
}

async fn me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Value>, AppError> {
    let counters = state.store.counters(user.doc.id).await?;

    Ok(Json(json!({
        "success": true,
        "user": profile(user.doc, counters),
    })))
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

/// The reset token comes back in the response body. A deployment with a
/// mail transport would send it there instead.
async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let email = body.email.trim().to_lowercase();

    let user = state
        .store
        .user_by_email(&email)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    let reset_token = mint_token(user.doc.id, &state.config.auth_secret, RESET_TOKEN_DAYS)?;

    Ok(Json(json!({
        "success": true,
        "message": "Password reset initiated",
        "resetToken": reset_token,
    })))
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    token: String,
    password: String,
}

async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<Value>, AppError> {
    check_password(&body.password)?;

    let user_id = verify_token(&body.token, &state.config.auth_secret)
        .ok_or(AppError::Unauthorized("Invalid or expired token"))?;

    let digest = PasswordDigest::new(&body.password);
    with_user(&state, user_id, |user| {
        user.password = digest.clone();
        Ok(())
    })
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password has been reset",
    })))
}

#[derive(Deserialize)]
struct UpdateProfileRequest {
    username: Option<String>,
    email: Option<String>,
    bio: Option<String>,
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = user.doc.id;

    let username = body.username.map(|u| u.trim().to_string());
    let email = body.email.map(|e| e.trim().to_lowercase());
    let bio = body.bio;

    if let Some(username) = &username {
        check_username(username)?;

        let taken = state.store.username_owner(username).await?;
        if taken.is_some_and(|owner| owner != user_id) {
            return Err(AppError::AlreadyExists("username"));
        }
    }

    if let Some(email) = &email {
        check_email(email)?;

        let taken = state.store.email_owner(email).await?;
        if taken.is_some_and(|owner| owner != user_id) {
            return Err(AppError::AlreadyExists("email"));
        }
    }

    if let Some(bio) = &bio {
        if bio.chars().count() > BIO_MAX {
            return Err(AppError::InvalidArgument(format!(
                "Bio must be at most {BIO_MAX} characters"
            )));
        }
    }

    let mut old_username = None;
    let mut old_email = None;

    let (updated, _) = with_user(&state, user_id, |user| {
        old_username = Some(user.username.clone());
        old_email = Some(user.email.clone());

        if let Some(username) = &username {
            user.username = username.clone();
        }
        if let Some(email) = &email {
            user.email = email.clone();
        }
        if let Some(bio) = &bio {
            user.bio = bio.clone();
        }

        Ok(())
    })
    .await?;

    if let (Some(old), Some(new)) = (&old_username, &username) {
        state.store.rebind_username(old, new, user_id).await?;
    }
    if let (Some(old), Some(new)) = (&old_email, &email) {
        state.store.rebind_email(old, new, user_id).await?;
    }

    sync_user_index(&state, &updated).await;

    let counters = state.store.counters(user_id).await?;

    Ok(Json(json!({
        "success": true,
        "user": profile(updated, counters),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_bounds() {
        assert!(check_username("abc").is_ok());
        assert!(check_username(&"a".repeat(30)).is_ok());

        assert!(check_username("ab").is_err());
        assert!(check_username(&"a".repeat(31)).is_err());
    }

    #[test]
    fn password_minimum_counts_chars() {
        assert!(check_password("12345678").is_ok());
        assert!(check_password("1234567").is_err());
        assert!(check_password("пароль78").is_ok());
    }

    #[test]
    fn email_needs_an_at() {
        assert!(check_email("a@b.com").is_ok());
        assert!(check_email("not-an-email").is_err());
    }
}
