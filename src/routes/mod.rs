//! HTTP handlers, grouped the way the API is mounted: `/api/auth`,
//! `/api/posts`, `/api/content`.
//!
//! Shared here: response views with author records populated in place of
//! bare ids, and the compare-and-swap retry loops every mutation goes
//! through.

pub mod auth;
pub mod content;
pub mod posts;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        Activity, ContentType, MAX_ACTIVITY, Post, PostId, PostStatus, User, UserCounters, UserId,
    },
    search,
    state::AppState,
    utils::excerpt,
    votes::VoteState,
};

/// Attempts per optimistic save before giving up with `Conflict`.
const CAS_RETRIES: usize = 4;

const ACTIVITY_EXCERPT_CHARS: usize = 150;

/// Reloads the post and reapplies `mutate` until a compare-and-swap save
/// lands. Returns the saved post and whatever the closure produced on the
/// winning attempt.
pub(crate) async fn with_post<R>(
    state: &AppState,
    id: PostId,
    mut mutate: impl FnMut(&mut Post) -> Result<R, AppError>,
) -> Result<(Post, R), AppError> {
    for _ in 0..CAS_RETRIES {
        let Some(mut current) = state.store.post(id).await? else {
            return Err(AppError::NotFound("Post"));
        };

        let result = mutate(&mut current.doc)?;

        if state.store.update_post(&current).await? {
            return Ok((current.doc, result));
        }
    }

    Err(AppError::Conflict)
}

pub(crate) async fn with_user<R>(
    state: &AppState,
    id: UserId,
    mut mutate: impl FnMut(&mut User) -> Result<R, AppError>,
) -> Result<(User, R), AppError> {
    for _ in 0..CAS_RETRIES {
        let Some(mut current) = state.store.user(id).await? else {
            return Err(AppError::NotFound("User"));
        };

        let result = mutate(&mut current.doc)?;

        if state.store.update_user(&current).await? {
            return Ok((current.doc, result));
        }
    }

    Err(AppError::Conflict)
}

/// Appends an entry to the user's stored activity feed, dropping the oldest
/// entries past the cap.
pub(crate) async fn record_activity(
    state: &AppState,
    user_id: UserId,
    kind: crate::models::ActivityKind,
    title: String,
    content: &str,
    link: String,
) -> Result<(), AppError> {
    let entry = Activity {
        kind,
        title,
        content: excerpt(content, ACTIVITY_EXCERPT_CHARS),
        timestamp: Utc::now(),
        link,
    };

    with_user(state, user_id, |user| {
        user.activity.push(entry.clone());
        if user.activity.len() > MAX_ACTIVITY {
            let excess = user.activity.len() - MAX_ACTIVITY;
            user.activity.drain(..excess);
        }
        user.last_active = entry.timestamp;
        Ok(())
    })
    .await?;

    Ok(())
}

/// Pushes a post into the search index. Search is eventually consistent
/// with the store, so failures are logged rather than failing the request.
pub(crate) async fn sync_post_index(state: &AppState, post: &Post) {
    let author_name = match state.store.user(post.author).await {
        Ok(Some(author)) => author.doc.username,
        _ => String::new(),
    };

    if let Err(e) = search::sync_post(&state.search, post, &author_name).await {
        warn!("Search sync failed for post {}: {e}", post.id);
    }
}

pub(crate) async fn sync_user_index(state: &AppState, user: &User) {
    let reputation = match state.store.counters(user.id).await {
        Ok(counters) => counters.reputation,
        Err(_) => 0,
    };

    if let Err(e) = search::sync_user(&state.search, user, reputation).await {
        warn!("Search sync failed for user {}: {e}", user.id);
    }
}

#[derive(Serialize)]
pub(crate) struct TermCount {
    pub name: String,
    pub count: usize,
}

/// Counts occurrences and ranks them most-frequent first, ties broken
/// alphabetically so responses stay stable.
pub(crate) fn ranked_counts(values: impl IntoIterator<Item = String>) -> Vec<TermCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }

    let mut ranked: Vec<TermCount> = counts
        .into_iter()
        .map(|(name, count)| TermCount { name, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

    ranked
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub avatar: String,
    pub reputation: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: Uuid,
    pub content: String,
    pub author: Option<UserSummary>,
    pub timestamp: DateTime<Utc>,
    pub votes: VoteState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: PostId,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub content_type: ContentType,
    pub author: Option<UserSummary>,
    pub category: String,
    pub tags: Vec<String>,
    pub status: PostStatus,
    pub timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub view_count: u64,
    pub votes: VoteState,
    pub comment_count: usize,
    pub comments: Vec<CommentView>,
}

/// The caller's own record: everything except the password digest, with
/// live counters merged in.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: crate::models::Role,
    pub avatar: String,
    pub bio: String,
    pub joined: DateTime<Utc>,
    pub preferences: crate::models::Preferences,
    pub activity: Vec<Activity>,
    pub last_active: DateTime<Utc>,
    pub posts: i64,
    pub comments: i64,
    pub reputation: i64,
}

pub(crate) fn profile(user: User, counters: UserCounters) -> UserProfile {
    UserProfile {
        id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        avatar: user.avatar,
        bio: user.bio,
        joined: user.joined,
        preferences: user.preferences,
        activity: user.activity,
        last_active: user.last_active,
        posts: counters.posts,
        comments: counters.comments,
        reputation: counters.reputation,
    }
}

/// Loads author summaries for a set of user ids, one entry per distinct id.
pub(crate) async fn summaries_for(
    state: &AppState,
    ids: impl IntoIterator<Item = UserId>,
) -> Result<HashMap<UserId, UserSummary>, AppError> {
    let mut authors = HashMap::new();

    for id in ids {
        if authors.contains_key(&id) {
            continue;
        }
        if let Some(user) = state.store.user(id).await? {
            let reputation = state.store.counters(id).await?.reputation;
            authors.insert(
                id,
                UserSummary {
                    id,
                    username: user.doc.username,
                    avatar: user.doc.avatar,
                    reputation,
                },
            );
        }
    }

    Ok(authors)
}

pub(crate) async fn post_views(
    state: &AppState,
    posts: Vec<Post>,
) -> Result<Vec<PostView>, AppError> {
    let ids: Vec<UserId> = posts
        .iter()
        .flat_map(|post| {
            std::iter::once(post.author).chain(post.comments.iter().map(|c| c.author))
        })
        .collect();

    let authors = summaries_for(state, ids).await?;

    Ok(posts
        .into_iter()
        .map(|post| build_post_view(post, &authors))
        .collect())
}

pub(crate) async fn post_view(state: &AppState, post: Post) -> Result<PostView, AppError> {
    let mut views = post_views(state, vec![post]).await?;

    Ok(views.pop().expect("one post in, one view out"))
}

fn build_post_view(post: Post, authors: &HashMap<UserId, UserSummary>) -> PostView {
    let comments = post
        .comments
        .into_iter()
        .map(|comment| CommentView {
            id: comment.id,
            content: comment.content,
            author: authors.get(&comment.author).cloned(),
            timestamp: comment.timestamp,
            votes: comment.votes,
        })
        .collect::<Vec<_>>();

    PostView {
        id: post.id,
        title: post.title,
        slug: post.slug,
        content: post.content,
        content_type: post.content_type,
        author: authors.get(&post.author).cloned(),
        category: post.category,
        tags: post.tags,
        status: post.status,
        timestamp: post.timestamp,
        updated_at: post.updated_at,
        view_count: post.view_count,
        votes: post.votes,
        comment_count: comments.len(),
        comments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranked_counts_orders_by_count_then_name() {
        let ranked = ranked_counts(
            ["b", "a", "b", "c", "a", "b"]
                .into_iter()
                .map(str::to_string),
        );

        assert_eq!(ranked[0].name, "b");
        assert_eq!(ranked[0].count, 3);
        assert_eq!(ranked[1].name, "a");
        assert_eq!(ranked[1].count, 2);
        assert_eq!(ranked[2].name, "c");
        assert_eq!(ranked[2].count, 1);
    }

    #[test]
    fn ranked_counts_on_empty_input() {
        assert!(ranked_counts(Vec::new()).is_empty());
    }
}
