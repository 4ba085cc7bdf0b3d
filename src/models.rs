//! Domain records stored as JSON documents in Redis.
//!
//! `User` and `Post` are the two document roots. Comments and revisions are
//! embedded in their post. Per-user counters (posts, comments, reputation)
//! live outside the user document so they can be adjusted atomically, see
//! [`crate::database`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::PasswordDigest;
use crate::votes::VoteState;

pub type UserId = Uuid;
pub type PostId = Uuid;

pub const DEFAULT_AVATAR: &str = "https://via.placeholder.com/150";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }

    /// Admins hold moderator privileges as well.
    pub fn is_moderator(self) -> bool {
        self == Role::Moderator || self == Role::Admin
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password: PasswordDigest,
    pub role: Role,
    pub avatar: String,
    #[serde(default)]
    pub bio: String,
    pub joined: DateTime<Utc>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub activity: Vec<Activity>,
    pub last_active: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, email: String, password: PasswordDigest) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password,
            role: Role::User,
            avatar: DEFAULT_AVATAR.to_string(),
            bio: String::new(),
            joined: now,
            preferences: Preferences::default(),
            activity: Vec::new(),
            last_active: now,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub theme: Theme,
    pub email_notifications: bool,
    pub forum_digest: Digest,
    pub editor_preference: Editor,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            email_notifications: true,
            forum_digest: Digest::Weekly,
            editor_preference: Editor::Markdown,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    System,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Digest {
    Daily,
    Weekly,
    Never,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Editor {
    Markdown,
    Richtext,
}

/// One entry in a user's stored activity feed, kept alongside the profile
/// for quick display. Bounded by [`MAX_ACTIVITY`].
#[derive(Clone, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub link: String,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Post,
    Comment,
}

pub const MAX_ACTIVITY: usize = 50;

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub content_type: ContentType,
    pub author: UserId,
    pub category: String,
    pub tags: Vec<String>,
    pub status: PostStatus,
    pub timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub view_count: u64,
    #[serde(default)]
    pub votes: VoteState,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub revisions: Vec<Revision>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Markdown,
    Richtext,
    Html,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Published,
    Archived,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Archived => "archived",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    pub author: UserId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub votes: VoteState,
}

/// A superseded version of a post's content, captured when an edit changes
/// the body.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub editor: UserId,
    pub reason: String,
}

/// Per-user derived counters, stored as atomic integer fields in Redis.
#[derive(Clone, Copy, Default, Serialize)]
pub struct UserCounters {
    pub posts: i64,
    pub comments: i64,
    pub reputation: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderator_privileges_include_admins() {
        assert!(Role::Admin.is_moderator());
        assert!(Role::Moderator.is_moderator());
        assert!(!Role::User.is_moderator());

        assert!(Role::Admin.is_admin());
        assert!(!Role::Moderator.is_admin());
    }
}
