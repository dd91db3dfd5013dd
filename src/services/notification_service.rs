use std::sync::Arc;

use chrono::Utc;

use crate::{
    error::{AppError, Result},
    models::{AuthorSnapshot, Notification, NotificationType, VoteType, paths},
    store::{Direction, DocumentStore, MergeWrite, Query, encode},
};

pub const DEFAULT_NOTIFICATION_LIMIT: usize = 20;

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn DocumentStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stores a notification for `recipient_id`. Acting on your own content
    /// notifies nobody and returns `None`.
    pub async fn notify(
        &self,
        recipient_id: &str,
        actor: &AuthorSnapshot,
        notification_type: NotificationType,
        message: &str,
        link: &str,
    ) -> Result<Option<String>> {
        if recipient_id.is_empty() || recipient_id == actor.id {
            return Ok(None);
        }

        let notification = Notification {
            id: String::new(),
            recipient_id: recipient_id.to_string(),
            sender_id: actor.id.clone(),
            sender_name: actor.name.clone(),
            sender_photo: actor.photo.clone(),
            notification_type,
            message: message.to_string(),
            link: link.to_string(),
            is_read: false,
            created_at: Utc::now(),
        };

        let path = self
            .store
            .create(paths::NOTIFICATIONS, encode(&notification)?)
            .await?;
        tracing::debug!(recipient_id, kind = ?notification_type, "notification stored");
        Ok(Some(path.id().to_string()))
    }

    /// Notifies a content author about a new like or dislike.
    pub async fn notify_vote(
        &self,
        content_author_id: &str,
        voter: &AuthorSnapshot,
        vote_type: VoteType,
        content_kind: &str,
        link: &str,
    ) -> Result<Option<String>> {
        let (notification_type, verb) = match vote_type {
            VoteType::Like => (NotificationType::Like, "liked"),
            VoteType::Dislike => (NotificationType::Dislike, "disliked"),
        };
        let message = format!("{} {} your {}", voter.name, verb, content_kind);
        self.notify(content_author_id, voter, notification_type, &message, link)
            .await
    }

    /// Notifies a post author about a comment, or a comment author about a reply.
    pub async fn notify_comment(
        &self,
        recipient_id: &str,
        commenter: &AuthorSnapshot,
        is_reply: bool,
        text: &str,
        link: &str,
    ) -> Result<Option<String>> {
        let (notification_type, action) = if is_reply {
            (NotificationType::Reply, "replied to your comment")
        } else {
            (NotificationType::Comment, "commented on your post")
        };
        let message = format!(
            "{} {}: \"{}\"",
            commenter.name,
            action,
            text.chars().take(100).collect::<String>()
        );
        self.notify(recipient_id, commenter, notification_type, &message, link)
            .await
    }

    /// Newest first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let mut query = Query::new().filter_eq("recipientId", user_id);
        if unread_only {
            query = query.filter_eq("isRead", false);
        }
        let query = query
            .order_by("createdAt", Direction::Descending)
            .limit(limit);

        let docs = self.store.query(paths::NOTIFICATIONS, &query).await?;
        docs.iter()
            .map(|doc| doc.decode().map_err(AppError::from))
            .collect()
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<usize> {
        let query = Query::new()
            .filter_eq("recipientId", user_id)
            .filter_eq("isRead", false);
        Ok(self.store.query(paths::NOTIFICATIONS, &query).await?.len())
    }

    pub async fn mark_as_read(&self, user_id: &str, notification_id: &str) -> Result<()> {
        paths::ensure_id("notification", notification_id)?;
        let path = paths::notification(notification_id);

        let owned = self
            .store
            .get(&path)
            .await?
            .is_some_and(|doc| doc.data.get("recipientId").and_then(|v| v.as_str()) == Some(user_id));
        if !owned {
            return Err(AppError::NotFound("Notification not found".to_string()));
        }

        self.store
            .merge(&path, MergeWrite::new().set("isRead", true))
            .await?;
        Ok(())
    }

    /// Returns how many notifications were flipped to read.
    pub async fn mark_all_as_read(&self, user_id: &str) -> Result<usize> {
        let query = Query::new()
            .filter_eq("recipientId", user_id)
            .filter_eq("isRead", false);
        let unread = self.store.query(paths::NOTIFICATIONS, &query).await?;

        futures::future::try_join_all(
            unread
                .iter()
                .map(|doc| self.store.merge(&doc.path, MergeWrite::new().set("isRead", true))),
        )
        .await?;
        Ok(unread.len())
    }
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
    async fn self_actions_are_not_notified() {
        let service = NotificationService::new(Arc::new(MemoryStore::new()));

        let id = service
            .notify_vote("u1", &user("u1"), VoteType::Like, "post", "/posts/p1")
            .await
            .unwrap();
        assert!(id.is_none());
        assert_eq!(service.unread_count("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lists_and_marks_read() {
        let service = NotificationService::new(Arc::new(MemoryStore::new()));

        let first = service
            .notify_vote("author", &user("fan"), VoteType::Like, "post", "/posts/p1")
            .await
            .unwrap()
            .unwrap();
        service
            .notify_comment("author", &user("fan"), false, "great post", "/posts/p1")
            .await
            .unwrap();
        service
            .notify_comment("someone", &user("fan"), true, "reply", "/posts/p1")
            .await
            .unwrap();

        let listed = service.list_for_user("author", 10, false).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|n| n.recipient_id == "author"));
        assert_eq!(service.unread_count("author").await.unwrap(), 2);

        service.mark_as_read("author", &first).await.unwrap();
        assert_eq!(service.unread_count("author").await.unwrap(), 1);
        assert_eq!(service.list_for_user("author", 10, true).await.unwrap().len(), 1);

        let foreign = service.mark_as_read("someone", &first).await;
        assert!(matches!(foreign, Err(AppError::NotFound(_))));

        assert_eq!(service.mark_all_as_read("author").await.unwrap(), 1);
        assert_eq!(service.unread_count("author").await.unwrap(), 0);
        assert_eq!(service.unread_count("someone").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn messages_describe_the_action() {
        let service = NotificationService::new(Arc::new(MemoryStore::new()));
        service
            .notify_vote("author", &user("fan"), VoteType::Dislike, "comment", "/posts/p1")
            .await
            .unwrap();

        let listed = service.list_for_user("author", 10, false).await.unwrap();
        assert_eq!(listed[0].notification_type, NotificationType::Dislike);
        assert_eq!(listed[0].message, "fan name disliked your comment");
        assert_eq!(listed[0].sender_id, "fan");
    }
}
