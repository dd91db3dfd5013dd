use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Badge {
    Admin,
    #[default]
    User,
}

impl Badge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Badge::Admin => "admin",
            Badge::User => "user",
        }
    }
}

/// Author identity copied onto posts and comments at write time. Later profile
/// edits do not touch existing content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    #[serde(rename = "authorId")]
    pub id: String,
    #[serde(rename = "authorName")]
    pub name: String,
    #[serde(rename = "authorPhoto", default)]
    pub photo: String,
    #[serde(rename = "authorBadge", default)]
    pub badge: Badge,
}

impl AuthorSnapshot {
    pub fn is_admin(&self) -> bool {
        self.badge == Badge::Admin
    }
}
