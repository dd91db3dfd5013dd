use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    AppState,
    auth::{AuthUser, OptionalAuthUser},
    error::{AppError, Result},
    models::{
        CascadeReport, CreatePostRequest, ListPostsQuery, NewPost, Post, PostFilter,
        PostResponse, VoteRequest, VoteResponse, VoteTarget,
    },
    services::{
        post_service,
        tag_service::{self, MAX_TAGS_PER_POST},
        vote_service,
    },
};

pub const MAX_PAGE_SIZE: usize = 100;

pub async fn get_posts(
    State(state): State<AppState>,
    Query(params): Query<ListPostsQuery>,
) -> Result<Json<Vec<Post>>> {
    let limit = params
        .limit
        .unwrap_or(state.config.feed_default_limit)
        .clamp(1, MAX_PAGE_SIZE);
    let filter = PostFilter {
        tag: params.tag,
        author: params.author,
    };

    let posts = post_service::list_posts(state.store.as_ref(), &filter, limit).await?;
    Ok(Json(posts))
}

pub async fn create_post(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    // Validate input
    payload.validate()?;

    // Rate limiting - limit post creation
    state
        .check_rate_limit(&format!("create_post:{}", auth_user.user_id), 10, 3600)
        .await?;

    // Explicit tags first, hashtags from the text fill the remaining slots.
    let mut tags = tag_service::normalize_tags(&payload.tags);
    if tags.len() <= MAX_TAGS_PER_POST {
        for hashtag in tag_service::extract_hashtags(&payload.content) {
            if tags.len() == MAX_TAGS_PER_POST {
                break;
            }
            if !tags.contains(&hashtag) {
                tags.push(hashtag);
            }
        }
    }

    let post_id = post_service::create_post(
        state.store.as_ref(),
        NewPost {
            author: auth_user.author(),
            content: payload.content,
            image_url: payload.image_url,
            tags,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Post created successfully",
            "postId": post_id
        })),
    ))
}

pub async fn get_post(
    State(state): State<AppState>,
    OptionalAuthUser(viewer): OptionalAuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<PostResponse>> {
    let post = post_service::get_post(state.store.as_ref(), &post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    let user_vote = match viewer {
        Some(viewer) => {
            vote_service::get_user_vote(
                state.store.as_ref(),
                &VoteTarget::post(&post_id),
                &viewer.user_id,
            )
            .await?
        }
        None => None,
    };

    Ok(Json(PostResponse { post, user_vote }))
}

pub async fn delete_post(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<CascadeReport>> {
    let report = post_service::delete_own_post(
        state.store.as_ref(),
        state.media.as_ref(),
        &post_id,
        &auth_user.user_id,
    )
    .await?;

    Ok(Json(report))
}

pub async fn admin_delete_post(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<CascadeReport>> {
    let report = post_service::delete_post_as_admin(
        state.store.as_ref(),
        state.media.as_ref(),
        &post_id,
        &auth_user.author(),
    )
    .await?;

    Ok(Json(report))
}

pub async fn get_post_vote(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<VoteResponse>> {
    let user_vote = vote_service::get_user_vote(
        state.store.as_ref(),
        &VoteTarget::post(post_id),
        &auth_user.user_id,
    )
    .await?;

    Ok(Json(VoteResponse { user_vote }))
}

pub async fn vote_post(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(post_id): Path<String>,
    Json(payload): Json<VoteRequest>,
) -> Result<Json<VoteResponse>> {
    state
        .check_rate_limit(&format!("vote:{}", auth_user.user_id), 120, 60)
        .await?;

    let user_vote = vote_service::toggle_post_vote(
        state.store.as_ref(),
        &post_id,
        &auth_user.user_id,
        payload.vote_type,
    )
    .await?;

    if let Some(vote_type) = user_vote {
        let store = state.store.clone();
        let notifications = state.notifications.clone();
        let voter = auth_user.author();
        tokio::spawn(async move {
            let post = match post_service::get_post(store.as_ref(), &post_id).await {
                Ok(Some(post)) => post,
                _ => return,
            };
            let link = format!("/posts/{}", post_id);
            if let Err(e) = notifications
                .notify_vote(&post.author.id, &voter, vote_type, "post", &link)
                .await
            {
                tracing::warn!(post_id = %post_id, error = %e, "failed to send vote notification");
            }
        });
    }

    Ok(Json(VoteResponse { user_vote }))
}
