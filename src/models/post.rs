use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::models::AuthorSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    #[serde(flatten)]
    pub author: AuthorSnapshot,
    pub content: String,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub dislikes_count: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

// Older documents store a missing image as "".
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|url| !url.trim().is_empty()))
}

/// Input of the create-post command.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author: AuthorSnapshot,
    pub content: String,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
}

/// Narrows a post listing by tag and/or author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PostFilter {
    pub tag: Option<String>,
    pub author: Option<String>,
}

// Create post request
#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
    #[validate(url)]
    pub image_url: Option<String>,
    #[validate(length(max = 20))]
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPostsQuery {
    pub limit: Option<usize>,
    pub tag: Option<String>,
    pub author: Option<String>,
}

/// Outcome of a cascading post deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub post_id: String,
    pub post_votes_deleted: usize,
    pub comments_deleted: usize,
    pub comment_votes_deleted: usize,
    pub media_removed: bool,
}

// Post response with the viewer's own vote
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResponse {
    #[serde(flatten)]
    pub post: Post,
    pub user_vote: Option<crate::models::VoteType>,
}
