//! # Redis
//!
//! RAM database holding the forum documents.
//!
//! ## Layout
//!
//! - `users` / `posts`: one hash each, document id to JSON value
//! - `users:ver` / `posts:ver`: version counters driving the
//!   compare-and-swap saves
//! - `idx:usernames`, `idx:emails`, `idx:slugs`: lookup and uniqueness
//!   indexes, reserved with `HSETNX`
//! - `cnt:posts`, `cnt:comments`, `cnt:reputation`: per-user integers
//!   adjusted with `HINCRBY` so concurrent votes and postings never lose an
//!   increment
//!
//! ## Saves
//!
//! Every document save goes through a Lua script that compares the stored
//! version with the one the caller loaded and writes document plus bumped
//! version in one step. A losing writer gets `false` back and reloads.
//! Listing endpoints read the whole hash and filter in memory; the dataset
//! is forum-sized.

use std::time::Duration;

use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Post, PostId, User, UserCounters, UserId},
};

const USERS: &str = "users";
const USERS_VER: &str = "users:ver";
const POSTS: &str = "posts";
const POSTS_VER: &str = "posts:ver";
const IDX_USERNAMES: &str = "idx:usernames";
const IDX_EMAILS: &str = "idx:emails";
const IDX_SLUGS: &str = "idx:slugs";
const CNT_POSTS: &str = "cnt:posts";
const CNT_COMMENTS: &str = "cnt:comments";
const CNT_REPUTATION: &str = "cnt:reputation";

const CAS_SCRIPT: &str = r"
local ver = redis.call('HGET', KEYS[2], ARGV[1])
if not ver then ver = '0' end
if ver ~= ARGV[2] then return 0 end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('HSET', KEYS[2], ARGV[1], ARGV[4])
return 1
";

/// A document paired with the version it was loaded at. Saving hands the
/// version back so the store can reject stale writes.
pub struct Versioned<T> {
    pub doc: T,
    pub version: u64,
}

pub struct Store {
    conn: ConnectionManager,
    cas: Script,
}

impl Store {
    pub async fn connect(redis_url: &str) -> Self {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Some(Duration::from_millis(100)));

        let client = Client::open(redis_url).unwrap();
        let conn = client
            .get_connection_manager_with_config(config)
            .await
            .unwrap();

        Self {
            conn,
            cas: Script::new(CAS_SCRIPT),
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn load<T: DeserializeOwned>(
        &self,
        docs: &str,
        vers: &str,
        id: Uuid,
    ) -> Result<Option<Versioned<T>>, AppError> {
        let mut conn = self.conn();
        let id = id.to_string();

        // Version first: a save that sneaks in between the two reads leaves
        // us with a version older than the document, which the CAS rejects.
        let Some(version): Option<u64> = conn.hget(vers, &id).await? else {
            return Ok(None);
        };
        let Some(json): Option<String> = conn.hget(docs, &id).await? else {
            return Ok(None);
        };

        Ok(Some(Versioned {
            doc: serde_json::from_str(&json)?,
            version,
        }))
    }

    async fn save_cas<T: Serialize>(
        &self,
        docs: &str,
        vers: &str,
        id: Uuid,
        current: &Versioned<T>,
    ) -> Result<bool, AppError> {
        let mut conn = self.conn();
        let json = serde_json::to_string(&current.doc)?;

        let applied: i64 = self
            .cas
            .key(docs)
            .key(vers)
            .arg(id.to_string())
            .arg(current.version.to_string())
            .arg(json)
            .arg((current.version + 1).to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(applied == 1)
    }

    async fn scan<T: DeserializeOwned>(&self, docs: &str) -> Result<Vec<T>, AppError> {
        let mut conn = self.conn();
        let entries: Vec<(String, String)> = conn.hgetall(docs).await?;

        entries
            .into_iter()
            .map(|(_, json)| serde_json::from_str(&json).map_err(AppError::from))
            .collect()
    }

    // --- users ---

    /// Stores a new user, reserving username and email. The email is checked
    /// first so collision errors name the same field the caller sees.
    pub async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let mut conn = self.conn();
        let id = user.id.to_string();

        let email_free: bool = conn.hset_nx(IDX_EMAILS, &user.email, &id).await?;
        if !email_free {
            return Err(AppError::AlreadyExists("email"));
        }

        let username_free: bool = conn.hset_nx(IDX_USERNAMES, &user.username, &id).await?;
        if !username_free {
            let _: () = conn.hdel(IDX_EMAILS, &user.email).await?;
            return Err(AppError::AlreadyExists("username"));
        }

        let json = serde_json::to_string(user)?;
        let _: () = conn.hset(USERS, &id, json).await?;
        let _: () = conn.hset(USERS_VER, &id, 1u64).await?;

        Ok(())
    }

    pub async fn user(&self, id: UserId) -> Result<Option<Versioned<User>>, AppError> {
        self.load(USERS, USERS_VER, id).await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<Versioned<User>>, AppError> {
        match self.email_owner(email).await? {
            Some(id) => self.user(id).await,
            None => Ok(None),
        }
    }

    pub async fn username_owner(&self, username: &str) -> Result<Option<UserId>, AppError> {
        let mut conn = self.conn();
        let id: Option<String> = conn.hget(IDX_USERNAMES, username).await?;

        Ok(id.and_then(|id| id.parse().ok()))
    }

    pub async fn email_owner(&self, email: &str) -> Result<Option<UserId>, AppError> {
        let mut conn = self.conn();
        let id: Option<String> = conn.hget(IDX_EMAILS, email).await?;

        Ok(id.and_then(|id| id.parse().ok()))
    }

    /// Compare-and-swap save. Returns false when the stored version moved
    /// on since `current` was loaded.
    pub async fn update_user(&self, current: &Versioned<User>) -> Result<bool, AppError> {
        self.save_cas(USERS, USERS_VER, current.doc.id, current).await
    }

    pub async fn rebind_username(
        &self,
        old: &str,
        new: &str,
        id: UserId,
    ) -> Result<(), AppError> {
        if old == new {
            return Ok(());
        }

        let mut conn = self.conn();
        let _: () = conn.hset(IDX_USERNAMES, new, id.to_string()).await?;
        let _: () = conn.hdel(IDX_USERNAMES, old).await?;

        Ok(())
    }

    pub async fn rebind_email(&self, old: &str, new: &str, id: UserId) -> Result<(), AppError> {
        if old == new {
            return Ok(());
        }

        let mut conn = self.conn();
        let _: () = conn.hset(IDX_EMAILS, new, id.to_string()).await?;
        let _: () = conn.hdel(IDX_EMAILS, old).await?;

        Ok(())
    }

    pub async fn all_users(&self) -> Result<Vec<User>, AppError> {
        self.scan(USERS).await
    }

    pub async fn count_users(&self) -> Result<u64, AppError> {
        let mut conn = self.conn();
        Ok(conn.hlen(USERS).await?)
    }

    // --- counters ---

    pub async fn counters(&self, id: UserId) -> Result<UserCounters, AppError> {
        let mut conn = self.conn();
        let id = id.to_string();

        let posts: Option<i64> = conn.hget(CNT_POSTS, &id).await?;
        let comments: Option<i64> = conn.hget(CNT_COMMENTS, &id).await?;
        let reputation: Option<i64> = conn.hget(CNT_REPUTATION, &id).await?;

        Ok(UserCounters {
            posts: posts.unwrap_or(0),
            comments: comments.unwrap_or(0),
            reputation: reputation.unwrap_or(0),
        })
    }

    pub async fn incr_post_count(&self, id: UserId, delta: i64) -> Result<i64, AppError> {
        let mut conn = self.conn();
        Ok(conn.hincr(CNT_POSTS, id.to_string(), delta).await?)
    }

    pub async fn incr_comment_count(&self, id: UserId, delta: i64) -> Result<i64, AppError> {
        let mut conn = self.conn();
        Ok(conn.hincr(CNT_COMMENTS, id.to_string(), delta).await?)
    }

    /// The single mutation point for reputation, fed by the vote tally's
    /// computed delta.
    pub async fn incr_reputation(&self, id: UserId, delta: i64) -> Result<i64, AppError> {
        let mut conn = self.conn();
        Ok(conn.hincr(CNT_REPUTATION, id.to_string(), delta).await?)
    }

    // --- posts ---

    /// Stores a new post, reserving its slug. Fails with `AlreadyExists`
    /// when the slug is taken so the caller can pick another suffix.
    pub async fn insert_post(&self, post: &Post) -> Result<(), AppError> {
        let mut conn = self.conn();
        let id = post.id.to_string();

        let slug_free: bool = conn.hset_nx(IDX_SLUGS, &post.slug, &id).await?;
        if !slug_free {
            return Err(AppError::AlreadyExists("slug"));
        }

        let json = serde_json::to_string(post)?;
        let _: () = conn.hset(POSTS, &id, json).await?;
        let _: () = conn.hset(POSTS_VER, &id, 1u64).await?;

        Ok(())
    }

    pub async fn post(&self, id: PostId) -> Result<Option<Versioned<Post>>, AppError> {
        self.load(POSTS, POSTS_VER, id).await
    }

    pub async fn slug_owner(&self, slug: &str) -> Result<Option<PostId>, AppError> {
        let mut conn = self.conn();
        let id: Option<String> = conn.hget(IDX_SLUGS, slug).await?;

        Ok(id.and_then(|id| id.parse().ok()))
    }

    pub async fn update_post(&self, current: &Versioned<Post>) -> Result<bool, AppError> {
        self.save_cas(POSTS, POSTS_VER, current.doc.id, current).await
    }

    pub async fn remove_post(&self, post: &Post) -> Result<(), AppError> {
        let mut conn = self.conn();
        let id = post.id.to_string();

        let _: () = conn.hdel(POSTS, &id).await?;
        let _: () = conn.hdel(POSTS_VER, &id).await?;
        let _: () = conn.hdel(IDX_SLUGS, &post.slug).await?;

        Ok(())
    }

    pub async fn all_posts(&self) -> Result<Vec<Post>, AppError> {
        self.scan(POSTS).await
    }

    pub async fn count_posts(&self) -> Result<u64, AppError> {
        let mut conn = self.conn();
        Ok(conn.hlen(POSTS).await?)
    }
}
