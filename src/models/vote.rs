use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Like,
    Dislike,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Like => "like",
            VoteType::Dislike => "dislike",
        }
    }

    /// Counter field on the target document.
    pub fn counter_field(&self) -> &'static str {
        match self {
            VoteType::Like => "likesCount",
            VoteType::Dislike => "dislikesCount",
        }
    }
}

/// A user's vote on one post or comment, keyed by the user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub user_id: String,
    #[serde(rename = "type")]
    pub vote_type: VoteType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// What a vote is cast against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteTarget {
    Post { post_id: String },
    Comment { post_id: String, comment_id: String },
}

// Vote request
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    #[serde(rename = "type")]
    pub vote_type: VoteType,
}

// Vote response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub user_vote: Option<VoteType>,
}
