use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, Result},
    models::{
        Comment, CreateCommentRequest, ListCommentsQuery, NewComment, VoteRequest, VoteResponse,
        VoteTarget,
    },
    services::{
        comment_service,
        comment_tree::{self, ThreadedComment},
        post_service, vote_service,
    },
};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CommentListing {
    Flat(Vec<Comment>),
    Tree(Vec<ThreadedComment>),
}

pub async fn get_post_comments(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Query(params): Query<ListCommentsQuery>,
) -> Result<Json<CommentListing>> {
    let comments = comment_service::list_comments(state.store.as_ref(), &post_id).await?;

    let listing = if params.tree {
        let forest = comment_tree::build_tree(&comments);
        CommentListing::Tree(comment_tree::flatten_forest(&forest))
    } else {
        CommentListing::Flat(comments)
    };
    Ok(Json(listing))
}

pub async fn create_comment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(post_id): Path<String>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    payload.validate()?;

    state
        .check_rate_limit(&format!("create_comment:{}", auth_user.user_id), 30, 300)
        .await?;

    let author = auth_user.author();
    let text = payload.text;
    let parent_id = payload.parent_id.filter(|id| !id.trim().is_empty());
    let comment_id = comment_service::create_comment(
        state.store.as_ref(),
        NewComment {
            post_id: post_id.clone(),
            parent_id: parent_id.clone(),
            author: author.clone(),
            text: text.clone(),
        },
    )
    .await?;

    // Reply notifications go to the parent's author, others to the post author.
    let store = state.store.clone();
    let notifications = state.notifications.clone();
    tokio::spawn(async move {
        let recipient = match &parent_id {
            Some(parent_id) => comment_service::get_comment(store.as_ref(), &post_id, parent_id)
                .await
                .ok()
                .flatten()
                .map(|parent| parent.author.id),
            None => post_service::get_post(store.as_ref(), &post_id)
                .await
                .ok()
                .flatten()
                .map(|post| post.author.id),
        };
        let Some(recipient) = recipient else {
            return;
        };

        let link = format!("/posts/{}", post_id);
        if let Err(e) = notifications
            .notify_comment(&recipient, &author, parent_id.is_some(), &text, &link)
            .await
        {
            tracing::warn!(post_id = %post_id, error = %e, "failed to send comment notification");
        }
    });

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Comment created successfully",
            "commentId": comment_id
        })),
    ))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path((post_id, comment_id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let comment = comment_service::get_comment(state.store.as_ref(), &post_id, &comment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    if comment.author.id != auth_user.user_id && !auth_user.is_admin() {
        return Err(AppError::Authorization(
            "Only the author or an admin can delete this comment".to_string(),
        ));
    }

    let deleted =
        comment_service::delete_comment(state.store.as_ref(), &post_id, &comment_id).await?;

    Ok(Json(json!({
        "message": "Comment deleted successfully",
        "deleted": deleted
    })))
}

pub async fn get_comment_vote(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path((post_id, comment_id)): Path<(String, String)>,
) -> Result<Json<VoteResponse>> {
    let user_vote = vote_service::get_user_vote(
        state.store.as_ref(),
        &VoteTarget::comment(post_id, comment_id),
        &auth_user.user_id,
    )
    .await?;

    Ok(Json(VoteResponse { user_vote }))
}

pub async fn vote_comment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path((post_id, comment_id)): Path<(String, String)>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<VoteResponse>> {
    state
        .check_rate_limit(&format!("vote:{}", auth_user.user_id), 120, 60)
        .await?;

    let user_vote = vote_service::toggle_comment_vote(
        state.store.as_ref(),
        &post_id,
        &comment_id,
        &auth_user.user_id,
        payload.vote_type,
    )
    .await?;

    if let Some(vote_type) = user_vote {
        let store = state.store.clone();
        let notifications = state.notifications.clone();
        let voter = auth_user.author();
        tokio::spawn(async move {
            let comment =
                match comment_service::get_comment(store.as_ref(), &post_id, &comment_id).await {
                    Ok(Some(comment)) => comment,
                    _ => return,
                };
            let link = format!("/posts/{}", post_id);
            if let Err(e) = notifications
                .notify_vote(&comment.author.id, &voter, vote_type, "comment", &link)
                .await
            {
                tracing::warn!(comment_id = %comment_id, error = %e, "failed to send vote notification");
            }
        });
    }

    Ok(Json(VoteResponse { user_vote }))
}
