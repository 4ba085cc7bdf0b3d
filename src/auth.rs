//! Authentication and authorization.
//!
//! Session tokens are HS256 JWTs carrying the user id, accepted from the
//! `token` cookie or an `Authorization: Bearer` header. Passwords are stored
//! as salted, stretched SHA-256 digests; raw passwords never touch the
//! database.
//!
//! Role checks are capability functions over the closed [`Role`] set,
//! evaluated once per operation instead of ad-hoc string comparisons in
//! every handler.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{
        HeaderMap,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    database::Versioned,
    error::AppError,
    models::{Post, User, UserId},
    state::AppState,
};

const SALT_LEN: usize = 16;
const STRETCH_ROUNDS: u32 = 10_000;

/// Salted password digest, stored as `hex(salt)$hex(hash)`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    pub fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        Self(format!(
            "{}${}",
            hex::encode(salt),
            hex::encode(stretch(&salt, password))
        ))
    }

    pub fn verify(&self, password: &str) -> bool {
        let Some((salt_hex, hash_hex)) = self.0.split_once('$') else {
            return false;
        };
        let Ok(salt) = hex::decode(salt_hex) else {
            return false;
        };

        hex::encode(stretch(&salt, password)) == hash_hex
    }
}

fn stretch(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut digest: [u8; 32] = hasher.finalize().into();

    for _ in 1..STRETCH_ROUNDS {
        digest = Sha256::digest(digest).into();
    }

    digest
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

pub fn mint_token(user_id: UserId, secret: &str, ttl_days: i64) -> Result<String, AppError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::days(ttl_days)).timestamp(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Returns the user id carried by a valid, unexpired token.
pub fn verify_token(token: &str, secret: &str) -> Option<UserId> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    data.claims.sub.parse().ok()
}

pub fn session_cookie(token: &str, ttl_days: i64) -> String {
    format!(
        "token={token}; HttpOnly; Path=/; Max-Age={}; SameSite=Strict",
        ttl_days * 24 * 60 * 60
    )
}

pub fn clear_session_cookie() -> String {
    "token=; HttpOnly; Path=/; Max-Age=0; SameSite=Strict".to_string()
}

/// Extractor for the authenticated caller. Rejects with 401 when the token
/// is missing, invalid, or references a deleted account.
pub struct AuthUser(pub Versioned<User>);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| cookie_token(&parts.headers))
            .ok_or(AppError::Unauthorized("Not authenticated. Please login."))?;

        let user_id = verify_token(&token, &state.config.auth_secret)
            .ok_or(AppError::Unauthorized("Not authenticated. Invalid token."))?;

        let user = state
            .store
            .user(user_id)
            .await?
            .ok_or(AppError::Unauthorized("User not found"))?;

        Ok(AuthUser(user))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|pair| pair.trim().strip_prefix("token="))
        .map(str::to_string)
}

/// Authors can edit their own posts; moderators and admins can edit any.
pub fn can_edit_post(actor: &User, post: &Post) -> bool {
    post.author == actor.id || actor.role.is_moderator()
}

/// Only the author or an admin may remove a post outright. A moderator who
/// is not the author archives it instead, see the delete handler.
pub fn can_delete_post(actor: &User, post: &Post) -> bool {
    post.author == actor.id || actor.role.is_admin()
}

pub fn can_view_revisions(actor: &User, post: &Post) -> bool {
    post.author == actor.id || actor.role.is_moderator()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::{ContentType, PostStatus, Role};
    use crate::votes::VoteState;

    fn user_with_role(role: Role) -> User {
        let mut user = User::new(
            "tester".to_string(),
            "tester@example.com".to_string(),
            PasswordDigest::new("password123"),
        );
        user.role = role;
        user
    }

    fn post_by(author: UserId) -> Post {
        let now = Utc::now();
        Post {
            id: Uuid::new_v4(),
            title: "A title".to_string(),
            slug: "a-title".to_string(),
            content: "body".to_string(),
            content_type: ContentType::Markdown,
            author,
            category: "general".to_string(),
            tags: Vec::new(),
            status: PostStatus::Published,
            timestamp: now,
            updated_at: now,
            view_count: 0,
            votes: VoteState::default(),
            comments: Vec::new(),
            revisions: Vec::new(),
        }
    }

    #[test]
    fn digest_verifies_only_the_original_password() {
        let digest = PasswordDigest::new("hunter22");

        assert!(digest.verify("hunter22"));
        assert!(!digest.verify("hunter2"));
        assert!(!digest.verify(""));
    }

    #[test]
    fn identical_passwords_get_distinct_digests() {
        let a = PasswordDigest::new("same-password");
        let b = PasswordDigest::new("same-password");

        assert_ne!(a.0, b.0);
        assert!(a.verify("same-password"));
        assert!(b.verify("same-password"));
    }

    #[test]
    fn token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = mint_token(user_id, "secret", 7).unwrap();

        assert_eq!(verify_token(&token, "secret"), Some(user_id));
        assert_eq!(verify_token(&token, "other-secret"), None);
        assert_eq!(verify_token("garbage", "secret"), None);
    }

    #[test]
    fn edit_capability_covers_author_and_staff() {
        let author = user_with_role(Role::User);
        let post = post_by(author.id);

        assert!(can_edit_post(&author, &post));
        assert!(can_edit_post(&user_with_role(Role::Moderator), &post));
        assert!(can_edit_post(&user_with_role(Role::Admin), &post));
        assert!(!can_edit_post(&user_with_role(Role::User), &post));
    }

    #[test]
    fn delete_capability_excludes_moderators() {
        let author = user_with_role(Role::User);
        let post = post_by(author.id);

        assert!(can_delete_post(&author, &post));
        assert!(!can_delete_post(&user_with_role(Role::Moderator), &post));
        assert!(can_delete_post(&user_with_role(Role::Admin), &post));
    }
}
