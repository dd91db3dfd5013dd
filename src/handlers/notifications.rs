use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde_json::{Value, json};

use crate::{
    AppState,
    auth::AuthUser,
    error::Result,
    models::ListNotificationsQuery,
    services::notification_service::DEFAULT_NOTIFICATION_LIMIT,
};

pub async fn get_notifications(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(params): Query<ListNotificationsQuery>,
) -> Result<Json<Value>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_NOTIFICATION_LIMIT)
        .clamp(1, 100);

    let notifications = state
        .notifications
        .list_for_user(&auth_user.user_id, limit, params.unread_only)
        .await?;
    let unread_count = state.notifications.unread_count(&auth_user.user_id).await?;

    Ok(Json(json!({
        "notifications": notifications,
        "unreadCount": unread_count
    })))
}

pub async fn get_unread_count(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<Value>> {
    let count = state.notifications.unread_count(&auth_user.user_id).await?;

    Ok(Json(json!({
        "unreadCount": count
    })))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>> {
    state
        .notifications
        .mark_as_read(&auth_user.user_id, &notification_id)
        .await?;

    Ok(Json(json!({
        "message": "Notification marked as read"
    })))
}

pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<Value>> {
    let updated = state
        .notifications
        .mark_all_as_read(&auth_user.user_id)
        .await?;

    Ok(Json(json!({
        "message": "All notifications marked as read",
        "updated": updated
    })))
}
