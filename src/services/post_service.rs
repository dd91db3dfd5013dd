use chrono::Utc;

use crate::{
    error::{AppError, Result},
    models::{AuthorSnapshot, CascadeReport, NewPost, Post, PostFilter, paths},
    services::{
        comment_service,
        media_service::{MediaStore, remove_media_best_effort},
        tag_service::{self, MAX_TAGS_PER_POST},
        vote_service,
    },
    store::{Direction, DocumentStore, Query, encode},
};

pub const MAX_POST_LENGTH: usize = 5000;

/// Newest-first post query, optionally narrowed by tag and author.
pub fn post_query(filter: &PostFilter, limit: usize) -> Query {
    let mut query = Query::new();
    if let Some(tag) = filter.tag.as_deref().and_then(tag_service::normalize_tag) {
        query = query.array_contains("tags", tag);
    }
    if let Some(author) = filter.author.as_deref().filter(|a| !a.is_empty()) {
        query = query.filter_eq("authorId", author);
    }
    query
        .order_by("createdAt", Direction::Descending)
        .limit(limit)
}

/// Validates and stores a new post, then registers its tags. Tag registration
/// happens after the post write and its failures are only logged.
pub async fn create_post(store: &dyn DocumentStore, input: NewPost) -> Result<String> {
    let content = input.content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Post content cannot be empty".to_string()));
    }
    if content.chars().count() > MAX_POST_LENGTH {
        return Err(AppError::Validation(format!(
            "Post content cannot exceed {} characters",
            MAX_POST_LENGTH
        )));
    }

    let tags = tag_service::normalize_tags(&input.tags);
    if tags.len() > MAX_TAGS_PER_POST {
        return Err(AppError::Validation(format!(
            "A post can have at most {} tags",
            MAX_TAGS_PER_POST
        )));
    }

    let post = Post {
        id: String::new(),
        author: input.author,
        content: content.to_string(),
        image_url: input
            .image_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty()),
        tags,
        likes_count: 0,
        dislikes_count: 0,
        comments_count: 0,
        created_at: Utc::now(),
    };

    let path = store.create(paths::POSTS, encode(&post)?).await?;
    let post_id = path.id().to_string();
    tracing::info!(post_id = %post_id, author_id = %post.author.id, "post created");

    let registration = tag_service::register_tags(store, &post.tags).await;
    if !registration.failed.is_empty() {
        tracing::warn!(
            post_id = %post_id,
            failed = ?registration.failed,
            "some tags could not be registered"
        );
    }

    Ok(post_id)
}

pub async fn get_post(store: &dyn DocumentStore, post_id: &str) -> Result<Option<Post>> {
    paths::ensure_id("post", post_id)?;

    match store.get(&paths::post(post_id)).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

pub async fn list_posts(
    store: &dyn DocumentStore,
    filter: &PostFilter,
    limit: usize,
) -> Result<Vec<Post>> {
    let docs = store
        .query(paths::POSTS, &post_query(filter, limit))
        .await?;
    docs.iter()
        .map(|doc| doc.decode().map_err(AppError::from))
        .collect()
}

/// Deletes a post on behalf of its author.
pub async fn delete_own_post(
    store: &dyn DocumentStore,
    media: &dyn MediaStore,
    post_id: &str,
    requester_id: &str,
) -> Result<CascadeReport> {
    let post = get_post(store, post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    if post.author.id != requester_id {
        return Err(AppError::Authorization(
            "Only the author can delete this post".to_string(),
        ));
    }

    cascade_delete(store, media, post).await
}

/// Deletes any post; the requester must carry the admin badge.
pub async fn delete_post_as_admin(
    store: &dyn DocumentStore,
    media: &dyn MediaStore,
    post_id: &str,
    requester: &AuthorSnapshot,
) -> Result<CascadeReport> {
    if !requester.is_admin() {
        return Err(AppError::Authorization("Admin privileges required".to_string()));
    }

    let post = get_post(store, post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    tracing::info!(post_id, admin_id = %requester.id, "admin deleting post");
    cascade_delete(store, media, post).await
}

// Children before parent: post votes, each comment's votes then the comment,
// the post, and finally the media. Not atomic; a failure midway leaves the
// remaining documents for a retry.
//
// A comment or vote that commits after its collection was listed but before
// the post document is gone survives as an orphan under `posts/{id}`, and
// comment feeds of the post keep showing it. Once the post is deleted new
// comments and votes fail with `NotFound`, so a second sweep clears the rest.
async fn cascade_delete(
    store: &dyn DocumentStore,
    media: &dyn MediaStore,
    post: Post,
) -> Result<CascadeReport> {
    let mut report = CascadeReport {
        post_id: post.id.clone(),
        ..CascadeReport::default()
    };

    report.post_votes_deleted =
        vote_service::delete_votes(store, &paths::post_votes(&post.id)).await?;

    let (comments, comment_votes) = comment_service::delete_all_comments(store, &post.id).await?;
    report.comments_deleted = comments;
    report.comment_votes_deleted = comment_votes;

    store.delete(&paths::post(&post.id)).await?;

    if let Some(url) = &post.image_url {
        report.media_removed = remove_media_best_effort(media, url).await;
    }

    tracing::info!(
        post_id = %report.post_id,
        post_votes = report.post_votes_deleted,
        comments = report.comments_deleted,
        comment_votes = report.comment_votes_deleted,
        media_removed = report.media_removed,
        "post deleted"
    );
    Ok(report)
}
