use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::TimeDelta;
use serde_json::{Value, json};

use crate::{
    AppState,
    auth::AuthUser,
    error::Result,
    models::{ListOnlineUsersQuery, PresenceRequest, UserPresence},
    services::presence_service::{self, DEFAULT_ONLINE_LIMIT},
};

pub async fn update_presence(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<PresenceRequest>,
) -> Result<Json<Value>> {
    // Rate limiting
    state
        .check_rate_limit(&format!("presence:{}", auth_user.user_id), 30, 60)
        .await?;

    presence_service::update_presence(state.store.as_ref(), &auth_user.author(), payload.online)
        .await?;

    Ok(Json(json!({ "online": payload.online })))
}

pub async fn get_online_users(
    State(state): State<AppState>,
    Query(params): Query<ListOnlineUsersQuery>,
) -> Result<Json<Vec<UserPresence>>> {
    let limit = params.limit.unwrap_or(DEFAULT_ONLINE_LIMIT).clamp(1, 100);
    let window = TimeDelta::seconds(state.config.presence_window_secs);
    let users = presence_service::list_online_users(state.store.as_ref(), window, limit).await?;
    Ok(Json(users))
}
