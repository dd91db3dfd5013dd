//! Document layout of the forum inside the store.

use crate::error::{AppError, Result};
use crate::models::VoteTarget;
use crate::store::DocPath;

pub const POSTS: &str = "posts";
pub const TAGS: &str = "tags";
pub const NOTIFICATIONS: &str = "notifications";
pub const USERS: &str = "users";

pub fn post(post_id: &str) -> DocPath {
    DocPath::new(POSTS, post_id)
}

pub fn post_votes(post_id: &str) -> String {
    post(post_id).subcollection("votes")
}

pub fn comments(post_id: &str) -> String {
    post(post_id).subcollection("comments")
}

pub fn comment(post_id: &str, comment_id: &str) -> DocPath {
    DocPath::new(comments(post_id), comment_id)
}

pub fn comment_votes(post_id: &str, comment_id: &str) -> String {
    comment(post_id, comment_id).subcollection("votes")
}

pub fn tag(label: &str) -> DocPath {
    DocPath::new(TAGS, label)
}

pub fn notification(notification_id: &str) -> DocPath {
    DocPath::new(NOTIFICATIONS, notification_id)
}

pub fn user(user_id: &str) -> DocPath {
    DocPath::new(USERS, user_id)
}

impl VoteTarget {
    pub fn post(post_id: impl Into<String>) -> Self {
        VoteTarget::Post {
            post_id: post_id.into(),
        }
    }

    pub fn comment(post_id: impl Into<String>, comment_id: impl Into<String>) -> Self {
        VoteTarget::Comment {
            post_id: post_id.into(),
            comment_id: comment_id.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VoteTarget::Post { .. } => "Post",
            VoteTarget::Comment { .. } => "Comment",
        }
    }

    pub fn doc_path(&self) -> DocPath {
        match self {
            VoteTarget::Post { post_id } => post(post_id),
            VoteTarget::Comment {
                post_id,
                comment_id,
            } => comment(post_id, comment_id),
        }
    }

    pub fn votes_collection(&self) -> String {
        self.doc_path().subcollection("votes")
    }

    pub fn vote_path(&self, user_id: &str) -> DocPath {
        DocPath::new(self.votes_collection(), user_id)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        match self {
            VoteTarget::Post { post_id } => ensure_id("post", post_id),
            VoteTarget::Comment {
                post_id,
                comment_id,
            } => {
                ensure_id("post", post_id)?;
                ensure_id("comment", comment_id)
            }
        }
    }
}

/// Rejects ids that cannot be a single path segment.
pub fn ensure_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() || id.contains('/') || id.len() > 128 {
        return Err(AppError::Validation(format!("Invalid {} id", kind)));
    }
    Ok(())
}
