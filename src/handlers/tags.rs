use axum::{
    extract::{Query, State},
    response::Json,
};

use crate::{
    AppState,
    error::Result,
    models::{ListTagsQuery, Tag},
    services::tag_service,
};

pub async fn get_tags(
    State(state): State<AppState>,
    Query(params): Query<ListTagsQuery>,
) -> Result<Json<Vec<Tag>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let tags = tag_service::list_tags(state.store.as_ref(), limit).await?;
    Ok(Json(tags))
}
