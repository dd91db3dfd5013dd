use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub usage_count: i64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Result of registering a post's tags; failures do not affect each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRegistration {
    pub registered: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTagsQuery {
    pub limit: Option<usize>,
}
