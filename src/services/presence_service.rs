use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    error::Result,
    models::{AuthorSnapshot, UserPresence, paths},
    store::{Direction, DocumentStore, MergeWrite, Query},
};

pub const DEFAULT_ONLINE_LIMIT: usize = 20;

/// Records a heartbeat (or a sign-off when `online` is false) for `user`.
pub async fn update_presence(
    store: &dyn DocumentStore,
    user: &AuthorSnapshot,
    online: bool,
) -> Result<()> {
    paths::ensure_id("user", &user.id)?;

    let write = MergeWrite::new()
        .set("displayName", user.name.as_str())
        .set("photoURL", user.photo.as_str())
        .set("badge", user.badge.as_str())
        .set("isOnline", online)
        .set("lastSeen", Utc::now().timestamp_millis());
    store.merge(&paths::user(&user.id), write).await?;

    tracing::debug!(user_id = %user.id, online, "presence updated");
    Ok(())
}

/// Online and heard from within `window` of `now`.
pub fn is_active(presence: &UserPresence, window: TimeDelta, now: DateTime<Utc>) -> bool {
    presence.is_online && presence.last_seen > now - window
}

/// Users marked online whose last heartbeat is inside `window`, most recently
/// seen first.
pub async fn list_online_users(
    store: &dyn DocumentStore,
    window: TimeDelta,
    limit: usize,
) -> Result<Vec<UserPresence>> {
    let query = Query::new()
        .filter_eq("isOnline", true)
        .order_by("lastSeen", Direction::Descending)
        .limit(limit);
    let docs = store.query(paths::USERS, &query).await?;

    let now = Utc::now();
    let mut users = Vec::with_capacity(docs.len());
    for doc in &docs {
        let presence: UserPresence = doc.decode()?;
        // Ordered by recency, so everything after the first stale entry is stale too.
        if !is_active(&presence, window, now) {
            break;
        }
        users.push(presence);
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Badge;
    use crate::store::MemoryStore;

    fn user(id: &str) -> AuthorSnapshot {
        AuthorSnapshot {
            id: id.to_string(),
            name: format!("{} name", id),
            photo: String::new(),
            badge: Badge::User,
        }
    }

    #[tokio::test]
    async fn heartbeat_marks_user_online() {
        let store = MemoryStore::new();
        update_presence(&store, &user("ana"), true).await.unwrap();

        let online = list_online_users(&store, TimeDelta::seconds(30), 20).await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, "ana");
        assert_eq!(online[0].display_name, "ana name");
        assert!(online[0].is_online);

        update_presence(&store, &user("ana"), false).await.unwrap();
        assert!(
            list_online_users(&store, TimeDelta::seconds(30), 20)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn stale_heartbeats_are_not_online() {
        let store = MemoryStore::new();
        store
            .merge(
                &paths::user("ghost"),
                MergeWrite::new()
                    .set("displayName", "Ghost")
                    .set("isOnline", true)
                    .set("lastSeen", Utc::now().timestamp_millis() - 120_000),
            )
            .await
            .unwrap();
        update_presence(&store, &user("ana"), true).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        update_presence(&store, &user("bob"), true).await.unwrap();

        let online = list_online_users(&store, TimeDelta::seconds(30), 20).await.unwrap();
        let ids: Vec<&str> = online.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["bob", "ana"]);

        let newest = list_online_users(&store, TimeDelta::seconds(30), 1).await.unwrap();
        assert_eq!(newest[0].id, "bob");
    }

    #[tokio::test]
    async fn rejects_malformed_user_ids() {
        let store = MemoryStore::new();
        assert!(update_presence(&store, &user("a/b"), true).await.is_err());
        assert_eq!(store.count_under(paths::USERS), 0);
    }
}
