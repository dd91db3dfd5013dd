use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, json};

use crate::{
    error::{AppError, Result},
    models::{Comment, NewComment, paths},
    services::vote_service,
    store::{
        Direction, DocumentStore, Query, StoreTransaction, TransactionBody, encode,
        run_transaction,
    },
};

pub const MAX_COMMENT_LENGTH: usize = 10_000;

struct CreateComment<'a> {
    comment_id: &'a str,
    input: &'a NewComment,
    text: &'a str,
}

#[async_trait]
impl TransactionBody for CreateComment<'_> {
    type Output = ();

    async fn run(&self, tx: &mut dyn StoreTransaction) -> Result<()> {
        let post_path = paths::post(&self.input.post_id);
        let post = tx
            .get(&post_path)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

        if let Some(parent_id) = &self.input.parent_id {
            tx.get(&paths::comment(&self.input.post_id, parent_id))
                .await?
                .ok_or_else(|| AppError::NotFound("Parent comment not found".to_string()))?;
        }

        let comment = Comment {
            id: self.comment_id.to_string(),
            post_id: self.input.post_id.clone(),
            parent_id: self.input.parent_id.clone(),
            author: self.input.author.clone(),
            text: self.text.to_string(),
            likes_count: 0,
            dislikes_count: 0,
            created_at: Utc::now(),
        };
        tx.set(
            &paths::comment(&self.input.post_id, self.comment_id),
            encode(&comment)?,
        );

        let mut fields = Map::new();
        fields.insert(
            "commentsCount".into(),
            json!(post.int_field("commentsCount").max(0) + 1),
        );
        tx.update(&post_path, fields);
        Ok(())
    }
}

/// Adds a comment and bumps the post's comment counter in one transaction.
pub async fn create_comment(store: &dyn DocumentStore, input: NewComment) -> Result<String> {
    paths::ensure_id("post", &input.post_id)?;
    if let Some(parent_id) = &input.parent_id {
        paths::ensure_id("comment", parent_id)?;
    }

    let text = input.text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Comment text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_COMMENT_LENGTH {
        return Err(AppError::Validation(format!(
            "Comment text cannot exceed {} characters",
            MAX_COMMENT_LENGTH
        )));
    }

    let comment_id = store.new_id();
    let body = CreateComment {
        comment_id: &comment_id,
        input: &input,
        text,
    };
    run_transaction(store, &body).await?;

    tracing::debug!(post_id = %input.post_id, comment_id = %comment_id, "comment created");
    Ok(comment_id)
}

pub async fn get_comment(
    store: &dyn DocumentStore,
    post_id: &str,
    comment_id: &str,
) -> Result<Option<Comment>> {
    paths::ensure_id("post", post_id)?;
    paths::ensure_id("comment", comment_id)?;

    match store.get(&paths::comment(post_id, comment_id)).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

/// All comments of a post, newest first.
pub async fn list_comments(store: &dyn DocumentStore, post_id: &str) -> Result<Vec<Comment>> {
    paths::ensure_id("post", post_id)?;

    let query = Query::new().order_by("createdAt", Direction::Descending);
    let docs = store.query(&paths::comments(post_id), &query).await?;
    docs.iter()
        .map(|doc| doc.decode().map_err(AppError::from))
        .collect()
}

struct DeleteComment<'a> {
    post_id: &'a str,
    comment_id: &'a str,
}

#[async_trait]
impl TransactionBody for DeleteComment<'_> {
    type Output = bool;

    async fn run(&self, tx: &mut dyn StoreTransaction) -> Result<bool> {
        let comment_path = paths::comment(self.post_id, self.comment_id);
        if tx.get(&comment_path).await?.is_none() {
            return Ok(false);
        }

        let post_path = paths::post(self.post_id);
        if let Some(post) = tx.get(&post_path).await? {
            let mut fields = Map::new();
            fields.insert(
                "commentsCount".into(),
                json!((post.int_field("commentsCount") - 1).max(0)),
            );
            tx.update(&post_path, fields);
        }

        tx.delete(&comment_path);
        Ok(true)
    }
}

/// Deletes one comment: its votes first, then the comment together with the
/// post counter decrement. Returns `false` if the comment was already gone.
/// Replies are kept and surface as roots in the tree.
pub async fn delete_comment(
    store: &dyn DocumentStore,
    post_id: &str,
    comment_id: &str,
) -> Result<bool> {
    paths::ensure_id("post", post_id)?;
    paths::ensure_id("comment", comment_id)?;

    let votes = vote_service::delete_votes(store, &paths::comment_votes(post_id, comment_id)).await?;

    let body = DeleteComment {
        post_id,
        comment_id,
    };
    let deleted = run_transaction(store, &body).await?;

    if deleted {
        tracing::debug!(post_id, comment_id, votes, "comment deleted");
    }
    Ok(deleted)
}

/// Cascade step of a post deletion: each comment's votes, then the comment.
/// Returns `(comments, comment_votes)` removed. Counters are not touched since
/// the post itself is about to go.
pub async fn delete_all_comments(
    store: &dyn DocumentStore,
    post_id: &str,
) -> Result<(usize, usize)> {
    let comments = store.query(&paths::comments(post_id), &Query::new()).await?;

    let mut votes_deleted = 0;
    for doc in &comments {
        votes_deleted += vote_service::delete_votes(store, &doc.path.subcollection("votes")).await?;
        store.delete(&doc.path).await?;
    }

    Ok((comments.len(), votes_deleted))
}

struct AdjustCommentCount<'a> {
    post_id: &'a str,
    delta: i64,
}

#[async_trait]
impl TransactionBody for AdjustCommentCount<'_> {
    type Output = i64;

    async fn run(&self, tx: &mut dyn StoreTransaction) -> Result<i64> {
        let post_path = paths::post(self.post_id);
        let post = tx
            .get(&post_path)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

        let next = (post.int_field("commentsCount") + self.delta).max(0);
        let mut fields = Map::new();
        fields.insert("commentsCount".into(), json!(next));
        tx.update(&post_path, fields);
        Ok(next)
    }
}

/// Shifts the post's comment counter by `delta`, clamped at zero.
pub async fn adjust_comment_count(
    store: &dyn DocumentStore,
    post_id: &str,
    delta: i64,
) -> Result<i64> {
    paths::ensure_id("post", post_id)?;
    run_transaction(store, &AdjustCommentCount { post_id, delta }).await
}
