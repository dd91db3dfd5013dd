use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, Result},
};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub folder: Option<String>,
}

pub async fn upload_image(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(params): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>)> {
    // Rate limiting
    state
        .check_rate_limit(&format!("upload:{}", auth_user.user_id), 20, 300)
        .await?;

    let (content_type, file_data) = extract_file_from_multipart(&mut multipart).await?;
    tracing::debug!(
        user_id = %auth_user.user_id,
        content_type = %content_type,
        size = file_data.len(),
        "uploading image"
    );

    let folder = params.folder.unwrap_or_else(|| "posts".to_string());
    let url = state.media.upload(file_data, &content_type, &folder).await?;

    Ok((StatusCode::CREATED, Json(json!({ "url": url }))))
}

// Returns the declared (or guessed) content type and the bytes of the `file` field.
async fn extract_file_from_multipart(multipart: &mut Multipart) -> Result<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = match (field.content_type(), field.file_name()) {
            (Some(declared), _) => declared.to_string(),
            (None, Some(file_name)) => mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .to_string(),
            (None, None) => "application/octet-stream".to_string(),
        };

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;
        return Ok((content_type, data.to_vec()));
    }

    Err(AppError::BadRequest("No file provided".to_string()))
}
