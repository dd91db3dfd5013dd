use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::AuthorSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    /// `None` for top-level comments, otherwise the id of the replied-to comment.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub author: AuthorSnapshot,
    pub text: String,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub dislikes_count: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: String,
    pub parent_id: Option<String>,
    pub author: AuthorSnapshot,
    pub text: String,
}

// Create comment request
#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 10000))]
    pub text: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListCommentsQuery {
    /// Return the nested reply forest instead of the flat list.
    #[serde(default)]
    pub tree: bool,
}
