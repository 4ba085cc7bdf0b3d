//! `/api/content`: aggregate views over the forum (home, featured, user
//! activity), the search proxy, and admin dashboard stats.

use std::{collections::HashSet, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    auth::AuthUser,
    error::AppError,
    models::{Post, PostStatus, UserId},
    search,
    state::AppState,
    utils::{MAX_PAGE_SIZE, excerpt},
};

use super::{post_views, ranked_counts, summaries_for};

const HOME_LIMIT: usize = 5;
const SEARCH_LIMIT: usize = 10;
const ACTIVITY_LIMIT: usize = 10;
const FEATURED_LIMIT: usize = 3;
const FEATURED_EXCERPT_CHARS: usize = 200;

/// Posts scoring below this count as flagged on the admin dashboard.
const FLAG_THRESHOLD: i64 = -5;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/home", get(home))
        .route("/search", get(search_content))
        .route("/dashboard-stats", get(dashboard_stats))
        .route("/content-types/{id}", get(content_types))
        .route("/user-activity/{user_id}", get(user_activity))
        .route("/featured", get(featured))
}

/// Liveness echo, mounted at `/api/health`.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.started.elapsed().as_secs(),
    }))
}

async fn home(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let mut published: Vec<Post> = state
        .store
        .all_posts()
        .await?
        .into_iter()
        .filter(|post| post.status == PostStatus::Published)
        .collect();

    let mut category_stats = ranked_counts(published.iter().map(|post| post.category.clone()));
    category_stats.truncate(HOME_LIMIT);

    published.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let recent: Vec<Post> = published.iter().take(HOME_LIMIT).cloned().collect();

    published.sort_by(|a, b| b.view_count.cmp(&a.view_count));
    published.truncate(HOME_LIMIT);

    let recent_views = post_views(&state, recent).await?;
    let popular_views = post_views(&state, published).await?;

    let mut users = state.store.all_users().await?;
    users.sort_by(|a, b| b.last_active.cmp(&a.last_active));
    users.truncate(HOME_LIMIT);

    let mut active_users = Vec::with_capacity(users.len());
    for user in users {
        let counters = state.store.counters(user.id).await?;
        active_users.push(json!({
            "id": user.id,
            "username": user.username,
            "avatar": user.avatar,
            "reputation": counters.reputation,
            "posts": counters.posts,
            "comments": counters.comments,
            "lastActive": user.last_active,
        }));
    }

    Ok(Json(json!({
        "success": true,
        "data": {
            "recentPosts": recent_views,
            "popularPosts": popular_views,
            "activeUsers": active_users,
            "categoryStats": category_stats,
        }
    })))
}

#[derive(Deserialize)]
struct SearchQuery {
    query: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<usize>,
}

async fn search_content(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, AppError> {
    let Some(text) = query.query.as_deref().filter(|text| !text.trim().is_empty()) else {
        return Err(AppError::InvalidArgument(
            "Search query is required".to_string(),
        ));
    };

    let kind = query.kind.as_deref().unwrap_or("all");
    let limit = query.limit.unwrap_or(SEARCH_LIMIT).clamp(1, MAX_PAGE_SIZE);

    let mut results = Map::new();

    if kind == "posts" || kind == "all" {
        let filter = search::post_filter(Some("published"), None, None, None);
        let (docs, _) =
            search::search_posts(&state.search, text, filter.as_deref(), limit, 0).await?;

        results.insert("posts".to_string(), serde_json::to_value(docs)?);
    }

    if kind == "users" || kind == "all" {
        let users = search::search_users(&state.search, text, limit).await?;

        results.insert("users".to_string(), serde_json::to_value(users)?);
    }

    Ok(Json(json!({ "success": true, "results": results })))
}

async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Value>, AppError> {
    if !user.doc.role.is_admin() {
        return Err(AppError::Forbidden("Admin access required"));
    }

    let user_total = state.store.count_users().await?;
    let post_total = state.store.count_posts().await?;

    let users = state.store.all_users().await?;
    let posts = state.store.all_posts().await?;

    let one_day_ago = Utc::now() - Duration::days(1);

    let comment_total: usize = posts.iter().map(|post| post.comments.len()).sum();
    let new_users = users.iter().filter(|u| u.joined >= one_day_ago).count();
    let new_posts = posts.iter().filter(|p| p.timestamp >= one_day_ago).count();
    let new_comments = posts
        .iter()
        .flat_map(|post| &post.comments)
        .filter(|comment| comment.timestamp >= one_day_ago)
        .count();

    let flagged = posts
        .iter()
        .filter(|post| post.votes.score < FLAG_THRESHOLD)
        .count();

    let admins: HashSet<UserId> = users
        .iter()
        .filter(|user| user.role.is_admin())
        .map(|user| user.id)
        .collect();
    let pending = posts
        .iter()
        .filter(|post| post.status == PostStatus::Draft && !admins.contains(&post.author))
        .count();

    Ok(Json(json!({
        "success": true,
        "stats": {
            "users": user_total,
            "newUsers24h": new_users,
            "posts": post_total,
            "newPosts24h": new_posts,
            "comments": comment_total,
            "newComments24h": new_comments,
            "flaggedContent": flagged,
            "pendingApprovals": pending,
        }
    })))
}

/// Editor capability descriptor. Static; per-document editor settings never
/// materialized beyond this shape.
async fn content_types(Path(id): Path<String>) -> Json<Value> {
    Json(json!({
        "id": id,
        "type": "markdown",
        "canEdit": true,
        "editMode": {
            "supportsPreview": true,
            "previewShortcut": "Ctrl+P",
            "features": [
                "headings",
                "bold",
                "italic",
                "lists",
                "links",
                "images",
                "tables",
                "code",
            ],
        }
    }))
}

/// The user's newest posts and comments, merged newest-first.
async fn user_activity(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Value>, AppError> {
    if state.store.user(user_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }

    let posts = state.store.all_posts().await?;

    let mut authored: Vec<&Post> = posts.iter().filter(|post| post.author == user_id).collect();
    authored.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    authored.truncate(ACTIVITY_LIMIT);

    let mut commented: Vec<(&Post, usize)> = posts
        .iter()
        .flat_map(|post| {
            post.comments
                .iter()
                .enumerate()
                .map(move |(index, _)| (post, index))
        })
        .filter(|(post, index)| post.comments[*index].author == user_id)
        .collect();
    commented.sort_by(|a, b| {
        b.0.comments[b.1]
            .timestamp
            .cmp(&a.0.comments[a.1].timestamp)
    });
    commented.truncate(ACTIVITY_LIMIT);

    let mut activity: Vec<(DateTime<Utc>, Value)> = Vec::new();

    for post in authored {
        activity.push((
            post.timestamp,
            json!({
                "type": "post",
                "title": post.title,
                "slug": post.slug,
                "timestamp": post.timestamp,
                "category": post.category,
                "tags": post.tags,
                "status": post.status,
            }),
        ));
    }

    for (post, index) in commented {
        let comment = &post.comments[index];
        activity.push((
            comment.timestamp,
            json!({
                "type": "comment",
                "postTitle": post.title,
                "postSlug": post.slug,
                "postId": post.id,
                "content": comment.content,
                "timestamp": comment.timestamp,
            }),
        ));
    }

    activity.sort_by(|a, b| b.0.cmp(&a.0));
    let activity: Vec<Value> = activity.into_iter().map(|(_, entry)| entry).collect();

    Ok(Json(json!({ "success": true, "activity": activity })))
}

/// Top published posts by views, score breaking ties.
async fn featured(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let mut posts: Vec<Post> = state
        .store
        .all_posts()
        .await?
        .into_iter()
        .filter(|post| post.status == PostStatus::Published)
        .collect();

    posts.sort_by(|a, b| {
        b.view_count
            .cmp(&a.view_count)
            .then_with(|| b.votes.score.cmp(&a.votes.score))
    });
    posts.truncate(FEATURED_LIMIT);

    let authors = summaries_for(&state, posts.iter().map(|post| post.author)).await?;

    let views: Vec<Value> = posts
        .into_iter()
        .map(|post| {
            json!({
                "id": post.id,
                "title": post.title,
                "slug": post.slug,
                "excerpt": excerpt(&post.content, FEATURED_EXCERPT_CHARS),
                "author": authors.get(&post.author),
                "category": post.category,
                "tags": post.tags,
                "timestamp": post.timestamp,
                "viewCount": post.view_count,
                "score": post.votes.score,
                "commentCount": post.comments.len(),
            })
        })
        .collect();

    Ok(Json(json!({ "success": true, "featuredContent": views })))
}
