//! # Meilisearch
//!
//! Search engine behind the forum's post and user search, proxied through
//! the backend rather than exposed to clients.
//!
//! ## Schema
//!
//! - `posts` index: title/content/tags searchable; category, tags, author
//!   and status filterable so listing filters can ride along with a query;
//!   createdAt/score/views sortable.
//! - `users` index: username and bio searchable.
//!
//! Documents are upserted when a post or user changes and removed when a
//! post is deleted. Redis stays the source of truth; the index is rebuilt
//! from it at startup, so losing the search volume costs nothing but a
//! reindex.

use std::sync::Arc;

use meilisearch_sdk::{
    client::Client,
    settings::{MinWordSizeForTypos, Settings, TypoToleranceSettings},
};
use serde::{Deserialize, Serialize};

use crate::{
    database::Store,
    error::AppError,
    models::{Post, PostId, User, UserId},
    utils::excerpt,
};

pub const POST_INDEX: &str = "posts";
pub const USER_INDEX: &str = "users";

pub const DOC_ID: &str = "id";
pub const POST_CREATED_AT: &str = "createdAt";
pub const POST_SCORE: &str = "score";
pub const POST_VIEWS: &str = "views";

const SEARCH_CONTENT_CHARS: usize = 1000;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDoc {
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub slug: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author: UserId,
    pub author_name: String,
    pub status: String,
    pub score: i64,
    pub views: u64,
    pub created_at: i64,
}

#[derive(Serialize, Deserialize)]
pub struct UserDoc {
    pub id: UserId,
    pub username: String,
    pub bio: String,
    pub reputation: i64,
}

pub async fn init_meilisearch(meili_url: &str, meili_admin_key: &str) -> Arc<Client> {
    let meili_client = Arc::new(Client::new(meili_url, Some(meili_admin_key)).unwrap());

    meili_client
        .index(POST_INDEX)
        .set_settings(&post_settings())
        .await
        .unwrap();

    meili_client
        .index(USER_INDEX)
        .set_settings(&user_settings())
        .await
        .unwrap();

    meili_client
}

/// Rebuilds both indexes from the store. Run once at startup; afterwards
/// the write path keeps the indexes in step.
pub async fn reindex_all(meili_client: &Client, store: &Store) -> Result<(), AppError> {
    let users = store.all_users().await?;

    let mut user_docs = Vec::with_capacity(users.len());
    for user in &users {
        let counters = store.counters(user.id).await?;
        user_docs.push(to_user_doc(user, counters.reputation));
    }

    let posts = store.all_posts().await?;
    let post_docs: Vec<PostDoc> = posts
        .iter()
        .map(|post| {
            let author_name = users
                .iter()
                .find(|user| user.id == post.author)
                .map(|user| user.username.clone())
                .unwrap_or_default();
            to_post_doc(post, &author_name)
        })
        .collect();

    upsert_items(meili_client, USER_INDEX, &user_docs).await?;
    upsert_items(meili_client, POST_INDEX, &post_docs).await?;

    Ok(())
}

pub fn to_post_doc(post: &Post, author_name: &str) -> PostDoc {
    PostDoc {
        id: post.id,
        title: post.title.clone(),
        content: excerpt(&post.content, SEARCH_CONTENT_CHARS),
        slug: post.slug.clone(),
        category: post.category.clone(),
        tags: post.tags.clone(),
        author: post.author,
        author_name: author_name.to_string(),
        status: post.status.as_str().to_string(),
        score: post.votes.score,
        views: post.view_count,
        created_at: post.timestamp.timestamp(),
    }
}

fn to_user_doc(user: &User, reputation: i64) -> UserDoc {
    UserDoc {
        id: user.id,
        username: user.username.clone(),
        bio: user.bio.clone(),
        reputation,
    }
}

pub async fn sync_post(
    meili_client: &Client,
    post: &Post,
    author_name: &str,
) -> Result<(), AppError> {
    upsert_items(meili_client, POST_INDEX, &[to_post_doc(post, author_name)]).await
}

pub async fn remove_post(meili_client: &Client, id: PostId) -> Result<(), AppError> {
    meili_client
        .index(POST_INDEX)
        .delete_document(id.to_string())
        .await?
        .wait_for_completion(meili_client, None, None)
        .await?;

    Ok(())
}

pub async fn sync_user(
    meili_client: &Client,
    user: &User,
    reputation: i64,
) -> Result<(), AppError> {
    upsert_items(meili_client, USER_INDEX, &[to_user_doc(user, reputation)]).await
}

async fn upsert_items<T>(meili_client: &Client, index_name: &str, items: &[T]) -> Result<(), AppError>
where
    T: Serialize + Send + Sync,
{
    if items.is_empty() {
        return Ok(());
    }

    meili_client
        .index(index_name)
        .add_or_update(items, Some(DOC_ID))
        .await?
        .wait_for_completion(meili_client, None, None)
        .await?;

    Ok(())
}

pub async fn search_posts(
    meili_client: &Client,
    query: &str,
    filter: Option<&str>,
    limit: usize,
    offset: usize,
) -> Result<(Vec<PostDoc>, usize), AppError> {
    let index = meili_client.index(POST_INDEX);
    let mut search = index.search();
    search
        .with_query(query)
        .with_limit(limit)
        .with_offset(offset)
        .with_sort(&["createdAt:desc"]);

    if let Some(filter) = filter {
        search.with_filter(filter);
    }

    let results = search.execute::<PostDoc>().await?;
    let total = results.estimated_total_hits.unwrap_or(results.hits.len());

    Ok((
        results.hits.into_iter().map(|hit| hit.result).collect(),
        total,
    ))
}

pub async fn search_users(
    meili_client: &Client,
    query: &str,
    limit: usize,
) -> Result<Vec<UserDoc>, AppError> {
    let results = meili_client
        .index(USER_INDEX)
        .search()
        .with_query(query)
        .with_limit(limit)
        .execute::<UserDoc>()
        .await?;

    Ok(results.hits.into_iter().map(|hit| hit.result).collect())
}

/// Builds a Meilisearch filter expression from the listing filters. Values
/// are quoted; embedded quotes are stripped rather than escaped.
pub fn post_filter(
    status: Option<&str>,
    category: Option<&str>,
    tag: Option<&str>,
    author: Option<UserId>,
) -> Option<String> {
    let mut clauses = Vec::new();

    if let Some(status) = status {
        clauses.push(format!("status = {}", quote(status)));
    }
    if let Some(category) = category {
        clauses.push(format!("category = {}", quote(category)));
    }
    if let Some(tag) = tag {
        clauses.push(format!("tags = {}", quote(tag)));
    }
    if let Some(author) = author {
        clauses.push(format!("author = {}", quote(&author.to_string())));
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', ""))
}

fn post_settings() -> Settings {
    Settings::new()
        .with_ranking_rules([
            "words",
            "typo",
            "proximity",
            "exactness",
            "attribute",
            "sort",
        ])
        .with_searchable_attributes(["title", "content", "tags"])
        .with_filterable_attributes(["category", "tags", "author", "status"])
        .with_sortable_attributes([POST_CREATED_AT, POST_SCORE, POST_VIEWS])
        .with_typo_tolerance(TypoToleranceSettings {
            enabled: Some(true),
            disable_on_attributes: None,
            disable_on_words: None,
            min_word_size_for_typos: Some(MinWordSizeForTypos {
                one_typo: Some(5),
                two_typos: Some(9),
            }),
        })
}

fn user_settings() -> Settings {
    Settings::new()
        .with_searchable_attributes(["username", "bio"])
        .with_sortable_attributes(["reputation"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_joins_clauses() {
        let filter = post_filter(Some("published"), Some("general"), None, None).unwrap();

        assert_eq!(filter, "status = \"published\" AND category = \"general\"");
    }

    #[test]
    fn filter_strips_embedded_quotes() {
        let filter = post_filter(None, Some("gen\"eral"), None, None).unwrap();

        assert_eq!(filter, "category = \"general\"");
    }

    #[test]
    fn empty_filter_is_none() {
        assert!(post_filter(None, None, None, None).is_none());
    }
}
