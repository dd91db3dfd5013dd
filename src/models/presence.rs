use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Badge;

/// Last heartbeat of a user, stored at `users/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "photoURL", default)]
    pub photo_url: String,
    #[serde(default)]
    pub badge: Badge,
    #[serde(default)]
    pub is_online: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
}

fn default_online() -> bool {
    true
}

// Heartbeat request
#[derive(Debug, Deserialize)]
pub struct PresenceRequest {
    #[serde(default = "default_online")]
    pub online: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListOnlineUsersQuery {
    pub limit: Option<usize>,
}
