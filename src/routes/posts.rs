//! `/api/posts`: post CRUD, comments, votes, revisions, and discovery
//! (categories, tags, related posts).

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, can_delete_post, can_edit_post, can_view_revisions},
    error::AppError,
    models::{
        ActivityKind, Comment, ContentType, Post, PostId, PostStatus, Revision, UserId,
    },
    search,
    state::AppState,
    utils::{DEFAULT_PAGE_SIZE, Pagination, slug_suffix, slugify},
    votes::{VoteAction, VoteState},
};

use super::{
    UserSummary, post_view, post_views, ranked_counts, record_activity, summaries_for,
    sync_post_index, with_post,
};

const TITLE_MIN: usize = 5;
const TITLE_MAX: usize = 200;

/// Fresh suffixes tried before giving up on a colliding slug.
const SLUG_ATTEMPTS: usize = 5;

const MAX_TAGS: usize = 50;
const RELATED_LIMIT: usize = 5;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_posts).post(create_post))
        .route("/categories", get(categories))
        .route("/tags", get(tags))
        .route(
            "/{post_id}",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/{post_id}/comments", post(add_comment))
        .route("/{post_id}/vote", post(vote_post))
        .route("/{post_id}/comments/{comment_id}/vote", post(vote_comment))
        .route("/{post_id}/revisions", get(revisions))
        .route("/{post_id}/related", get(related))
}

/// Post ids are UUIDs; any other identifier in the path is a slug.
async fn resolve(state: &AppState, identifier: &str) -> Result<PostId, AppError> {
    if let Ok(id) = identifier.parse::<PostId>() {
        return Ok(id);
    }

    state
        .store
        .slug_owner(identifier)
        .await?
        .ok_or(AppError::NotFound("Post"))
}

fn check_title(title: &str) -> Result<(), AppError> {
    let len = title.chars().count();
    if !(TITLE_MIN..=TITLE_MAX).contains(&len) {
        return Err(AppError::InvalidArgument(format!(
            "Title must be {TITLE_MIN} to {TITLE_MAX} characters"
        )));
    }

    Ok(())
}

#[derive(Deserialize)]
struct ListQuery {
    page: Option<usize>,
    limit: Option<usize>,
    category: Option<String>,
    tag: Option<String>,
    author: Option<UserId>,
    status: Option<String>,
    search: Option<String>,
}

/// Listing goes through Meilisearch when a search term is present,
/// otherwise straight over the store with the filters applied in memory.
async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let pagination = Pagination {
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    };
    let status = query.status.as_deref().unwrap_or("published");

    if let Some(text) = query.search.as_deref() {
        let filter = search::post_filter(
            Some(status),
            query.category.as_deref(),
            query.tag.as_deref(),
            query.author,
        );

        let (docs, total) = search::search_posts(
            &state.search,
            text,
            filter.as_deref(),
            pagination.limit(),
            pagination.offset(),
        )
        .await?;

        let mut posts = Vec::with_capacity(docs.len());
        for doc in docs {
            if let Some(found) = state.store.post(doc.id).await? {
                posts.push(found.doc);
            }
        }

        let views = post_views(&state, posts).await?;

        return Ok(Json(json!({
            "success": true,
            "total": total,
            "page": pagination.page,
            "pages": pagination.pages(total),
            "posts": views,
        })));
    }

    let mut posts: Vec<Post> = state
        .store
        .all_posts()
        .await?
        .into_iter()
        .filter(|post| post.status.as_str() == status)
        .filter(|post| query.category.as_deref().is_none_or(|c| post.category == c))
        .filter(|post| {
            query
                .tag
                .as_deref()
                .is_none_or(|t| post.tags.iter().any(|tag| tag == t))
        })
        .filter(|post| query.author.is_none_or(|a| post.author == a))
        .collect();

    posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let total = posts.len();
    let page: Vec<Post> = posts
        .into_iter()
        .skip(pagination.offset())
        .take(pagination.limit())
        .collect();

    let views = post_views(&state, page).await?;

    Ok(Json(json!({
        "success": true,
        "total": total,
        "page": pagination.page,
        "pages": pagination.pages(total),
        "posts": views,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostRequest {
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    category: Option<String>,
    content_type: Option<ContentType>,
    status: Option<PostStatus>,
}

async fn create_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let title = body.title.trim().to_string();
    check_title(&title)?;

    if body.content.trim().is_empty() {
        return Err(AppError::InvalidArgument("Content is required".to_string()));
    }

    let now = Utc::now();
    let mut new_post = Post {
        id: Uuid::new_v4(),
        title,
        slug: String::new(),
        content: body.content,
        content_type: body.content_type.unwrap_or(ContentType::Markdown),
        author: user.doc.id,
        category: body.category.unwrap_or_else(|| "general".to_string()),
        tags: body.tags,
        status: body.status.unwrap_or(PostStatus::Published),
        timestamp: now,
        updated_at: now,
        view_count: 0,
        votes: VoteState::default(),
        comments: Vec::new(),
        revisions: Vec::new(),
    };

    let base = slugify(&new_post.title);
    let mut stored = false;
    for _ in 0..SLUG_ATTEMPTS {
        let suffix = slug_suffix();
        new_post.slug = if base.is_empty() {
            suffix
        } else {
            format!("{base}-{suffix}")
        };

        match state.store.insert_post(&new_post).await {
            Ok(()) => {
                stored = true;
                break;
            }
            Err(AppError::AlreadyExists(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    if !stored {
        return Err(AppError::Conflict);
    }

    state.store.incr_post_count(user.doc.id, 1).await?;
    record_activity(
        &state,
        user.doc.id,
        ActivityKind::Post,
        new_post.title.clone(),
        &new_post.content,
        format!("/forum/posts/{}", new_post.id),
    )
    .await?;

    sync_post_index(&state, &new_post).await;

    let view = post_view(&state, new_post).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "post": view })),
    ))
}

async fn categories(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let posts = state.store.all_posts().await?;

    let ranked = ranked_counts(
        posts
            .iter()
            .filter(|post| post.status == PostStatus::Published)
            .map(|post| post.category.clone()),
    );

    Ok(Json(json!({ "success": true, "categories": ranked })))
}

async fn tags(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let posts = state.store.all_posts().await?;

    let mut ranked = ranked_counts(
        posts
            .iter()
            .filter(|post| post.status == PostStatus::Published)
            .flat_map(|post| post.tags.iter().cloned()),
    );
    ranked.truncate(MAX_TAGS);

    Ok(Json(json!({ "success": true, "tags": ranked })))
}

async fn get_post(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = resolve(&state, &identifier).await?;

    let (found, _) = with_post(&state, id, |post| {
        post.view_count += 1;
        Ok(())
    })
    .await?;

    let view = post_view(&state, found).await?;

    Ok(Json(json!({ "success": true, "post": view })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePostRequest {
    title: Option<String>,
    content: Option<String>,
    tags: Option<Vec<String>>,
    category: Option<String>,
    status: Option<PostStatus>,
    revision_reason: Option<String>,
}

async fn update_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(identifier): Path<String>,
    Json(body): Json<UpdatePostRequest>,
) -> Result<Json<Value>, AppError> {
    let id = resolve(&state, &identifier).await?;
    let actor = user.doc;

    let title = body.title.as_ref().map(|t| t.trim().to_string());
    if let Some(title) = &title {
        check_title(title)?;
    }

    let (updated, _) = with_post(&state, id, |post| {
        if !can_edit_post(&actor, post) {
            return Err(AppError::Forbidden("Not authorized to update this post"));
        }

        if let Some(content) = &body.content {
            if *content != post.content {
                let superseded = std::mem::replace(&mut post.content, content.clone());
                post.revisions.push(Revision {
                    content: superseded,
                    timestamp: Utc::now(),
                    editor: actor.id,
                    reason: body
                        .revision_reason
                        .clone()
                        .unwrap_or_else(|| "Post updated".to_string()),
                });
            }
        }

        if let Some(title) = &title {
            post.title = title.clone();
        }
        if let Some(tags) = &body.tags {
            post.tags = tags.clone();
        }
        if let Some(category) = &body.category {
            post.category = category.clone();
        }
        if let Some(status) = body.status {
            if !actor.role.is_moderator() {
                return Err(AppError::Forbidden("Only moderators may change post status"));
            }
            post.status = status;
        }

        post.updated_at = Utc::now();

        Ok(())
    })
    .await?;

    sync_post_index(&state, &updated).await;

    let view = post_view(&state, updated).await?;

    Ok(Json(json!({ "success": true, "post": view })))
}

async fn delete_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(identifier): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = resolve(&state, &identifier).await?;
    let actor = user.doc;

    let Some(existing) = state.store.post(id).await? else {
        return Err(AppError::NotFound("Post"));
    };
    let existing = existing.doc;

    if !can_delete_post(&actor, &existing) {
        // A moderator who is not the author takes the post out of
        // circulation instead of destroying it.
        if actor.role.is_moderator() {
            let (archived, _) = with_post(&state, id, |post| {
                post.status = PostStatus::Archived;
                post.updated_at = Utc::now();
                Ok(())
            })
            .await?;

            sync_post_index(&state, &archived).await;

            return Ok(Json(json!({
                "success": true,
                "message": "Post has been archived",
            })));
        }

        return Err(AppError::Forbidden("Not authorized to delete this post"));
    }

    state.store.remove_post(&existing).await?;
    state.store.incr_post_count(existing.author, -1).await?;

    if let Err(e) = search::remove_post(&state.search, existing.id).await {
        warn!("Search removal failed for post {}: {e}", existing.id);
    }

    Ok(Json(json!({
        "success": true,
        "message": "Post has been deleted",
    })))
}

#[derive(Deserialize)]
struct CommentRequest {
    content: String,
}

async fn add_comment(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(identifier): Path<String>,
    Json(body): Json<CommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = resolve(&state, &identifier).await?;

    if body.content.trim().is_empty() {
        return Err(AppError::InvalidArgument("Content is required".to_string()));
    }

    let comment = Comment {
        id: Uuid::new_v4(),
        content: body.content,
        author: user.doc.id,
        timestamp: Utc::now(),
        votes: VoteState::default(),
    };

    let (updated, _) = with_post(&state, id, |post| {
        post.comments.push(comment.clone());
        Ok(())
    })
    .await?;

    state.store.incr_comment_count(user.doc.id, 1).await?;
    record_activity(
        &state,
        user.doc.id,
        ActivityKind::Comment,
        format!("Comment on: \"{}\"", updated.title),
        &comment.content,
        format!("/forum/posts/{id}"),
    )
    .await?;

    let view = post_view(&state, updated).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "post": view })),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    vote_type: String,
}

async fn vote_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(identifier): Path<String>,
    Json(body): Json<VoteRequest>,
) -> Result<Json<Value>, AppError> {
    let id = resolve(&state, &identifier).await?;
    let action = VoteAction::parse(&body.vote_type).ok_or_else(|| {
        AppError::InvalidArgument(format!("Unknown vote type: {}", body.vote_type))
    })?;
    let voter = user.doc.id;

    let (updated, delta) = with_post(&state, id, |post| Ok(post.votes.apply(voter, action))).await?;

    // The delta lands on the post author's reputation, not the voter's.
    state.store.incr_reputation(updated.author, delta).await?;
    sync_post_index(&state, &updated).await;

    let view = post_view(&state, updated).await?;

    Ok(Json(json!({ "success": true, "post": view })))
}

async fn vote_comment(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path((identifier, comment_id)): Path<(String, Uuid)>,
    Json(body): Json<VoteRequest>,
) -> Result<Json<Value>, AppError> {
    let id = resolve(&state, &identifier).await?;
    let action = VoteAction::parse(&body.vote_type).ok_or_else(|| {
        AppError::InvalidArgument(format!("Unknown vote type: {}", body.vote_type))
    })?;
    let voter = user.doc.id;

    let (updated, (comment_author, delta)) = with_post(&state, id, |post| {
        let comment = post
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id)
            .ok_or(AppError::NotFound("Comment"))?;

        Ok((comment.author, comment.votes.apply(voter, action)))
    })
    .await?;

    state.store.incr_reputation(comment_author, delta).await?;

    let view = post_view(&state, updated).await?;

    Ok(Json(json!({ "success": true, "post": view })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RevisionView {
    content: String,
    timestamp: DateTime<Utc>,
    editor: Option<UserSummary>,
    reason: String,
}

async fn revisions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(identifier): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = resolve(&state, &identifier).await?;

    let Some(found) = state.store.post(id).await? else {
        return Err(AppError::NotFound("Post"));
    };
    let found = found.doc;

    if !can_view_revisions(&user.doc, &found) {
        return Err(AppError::Forbidden("Not authorized to view revisions"));
    }

    let editors = summaries_for(&state, found.revisions.iter().map(|r| r.editor)).await?;

    let views: Vec<RevisionView> = found
        .revisions
        .into_iter()
        .map(|revision| RevisionView {
            content: revision.content,
            timestamp: revision.timestamp,
            editor: editors.get(&revision.editor).cloned(),
            reason: revision.reason,
        })
        .collect();

    Ok(Json(json!({ "success": true, "revisions": views })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelatedPost {
    id: PostId,
    title: String,
    slug: String,
    timestamp: DateTime<Utc>,
    category: String,
    tags: Vec<String>,
}

/// Published posts sharing the category or a tag, newest first.
async fn related(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = resolve(&state, &identifier).await?;

    let Some(found) = state.store.post(id).await? else {
        return Err(AppError::NotFound("Post"));
    };
    let found = found.doc;

    let mut candidates: Vec<Post> = state
        .store
        .all_posts()
        .await?
        .into_iter()
        .filter(|other| other.id != found.id && other.status == PostStatus::Published)
        .filter(|other| {
            other.category == found.category
                || other.tags.iter().any(|tag| found.tags.contains(tag))
        })
        .collect();

    candidates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    candidates.truncate(RELATED_LIMIT);

    let views: Vec<RelatedPost> = candidates
        .into_iter()
        .map(|post| RelatedPost {
            id: post.id,
            title: post.title,
            slug: post.slug,
            timestamp: post.timestamp,
            category: post.category,
            tags: post.tags,
        })
        .collect();

    Ok(Json(json!({ "success": true, "relatedPosts": views })))
}
