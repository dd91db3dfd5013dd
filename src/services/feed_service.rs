//! Live queries over the document store.
//!
//! A [`Subscription`] holds the latest snapshot of a query in a `watch`
//! channel. A background task listens to the store's change stream and
//! reloads the whole snapshot whenever a relevant document changes, so
//! consumers always see full state, never diffs.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::TimeDelta;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    error::Result,
    models::{Comment, Post, PostFilter, Tag, UserPresence, paths},
    services::{comment_service, post_service, presence_service, tag_service},
    store::{ChangeEvent, DocumentStore},
};

/// Handle to a live query. Dropping it stops the background task.
pub struct Subscription<T> {
    receiver: watch::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T: Clone> Subscription<T> {
    /// Latest delivered snapshot.
    pub fn current(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Waits for the next snapshot. Returns `None` once the feed has stopped.
    pub async fn changed(&mut self) -> Option<T> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
trait LiveQuery: Send + Sync + 'static {
    type Output: Clone + PartialEq + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn is_relevant(&self, event: &ChangeEvent) -> bool;

    /// Reload period for queries whose result also depends on the clock.
    fn refresh_every(&self) -> Option<Duration> {
        None
    }

    async fn load(&self, store: &dyn DocumentStore) -> Result<Self::Output>;
}

struct PostsFeed {
    filter: PostFilter,
    limit: usize,
}

#[async_trait]
impl LiveQuery for PostsFeed {
    type Output = Vec<Post>;

    fn name(&self) -> &'static str {
        "posts"
    }

    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        event.path.collection() == paths::POSTS
    }

    async fn load(&self, store: &dyn DocumentStore) -> Result<Vec<Post>> {
        post_service::list_posts(store, &self.filter, self.limit).await
    }
}

struct PostFeed {
    post_id: String,
}

#[async_trait]
impl LiveQuery for PostFeed {
    type Output = Option<Post>;

    fn name(&self) -> &'static str {
        "post"
    }

    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        event.path.collection() == paths::POSTS && event.path.id() == self.post_id
    }

    async fn load(&self, store: &dyn DocumentStore) -> Result<Option<Post>> {
        post_service::get_post(store, &self.post_id).await
    }
}

struct CommentsFeed {
    collection: String,
    post_id: String,
}

#[async_trait]
impl LiveQuery for CommentsFeed {
    type Output = Vec<Comment>;

    fn name(&self) -> &'static str {
        "comments"
    }

    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        event.path.collection() == self.collection
    }

    async fn load(&self, store: &dyn DocumentStore) -> Result<Vec<Comment>> {
        comment_service::list_comments(store, &self.post_id).await
    }
}

struct TagsFeed {
    limit: usize,
}

#[async_trait]
impl LiveQuery for TagsFeed {
    type Output = Vec<Tag>;

    fn name(&self) -> &'static str {
        "tags"
    }

    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        event.path.collection() == paths::TAGS
    }

    async fn load(&self, store: &dyn DocumentStore) -> Result<Vec<Tag>> {
        tag_service::list_tags(store, self.limit).await
    }
}

struct OnlineUsersFeed {
    window: TimeDelta,
    limit: usize,
}

#[async_trait]
impl LiveQuery for OnlineUsersFeed {
    type Output = Vec<UserPresence>;

    fn name(&self) -> &'static str {
        "online"
    }

    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        event.path.collection() == paths::USERS
    }

    // Users drop out when their heartbeat ages past the window, without any write.
    fn refresh_every(&self) -> Option<Duration> {
        let third = self.window.to_std().ok()? / 3;
        Some(third.max(Duration::from_millis(10)))
    }

    async fn load(&self, store: &dyn DocumentStore) -> Result<Vec<UserPresence>> {
        presence_service::list_online_users(store, self.window, self.limit).await
    }
}

async fn start<Q: LiveQuery>(
    store: Arc<dyn DocumentStore>,
    query: Q,
) -> Result<Subscription<Q::Output>> {
    // Subscribe before the first load so no commit slips in between.
    let mut changes = store.changes();
    let initial = query.load(store.as_ref()).await?;
    let (sender, receiver) = watch::channel(initial);

    let task = tokio::spawn(async move {
        let mut ticker = query.refresh_every().map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let received = match ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    received = changes.recv() => Some(received),
                    _ = ticker.tick() => None,
                },
                None => Some(changes.recv().await),
            };

            match received {
                Some(Ok(event)) if query.is_relevant(&event) => {}
                Some(Ok(_)) => continue,
                Some(Err(RecvError::Lagged(skipped))) => {
                    tracing::debug!(feed = query.name(), skipped, "change stream lagged, reloading");
                }
                Some(Err(RecvError::Closed)) => break,
                None => {}
            }

            // Fold a burst of pending events into one reload.
            while changes.try_recv().is_ok() {}

            match query.load(store.as_ref()).await {
                Ok(snapshot) => {
                    sender.send_if_modified(|current| {
                        if *current == snapshot {
                            false
                        } else {
                            *current = snapshot;
                            true
                        }
                    });
                    tracing::debug!(feed = query.name(), "snapshot refreshed");
                }
                Err(e) => {
                    tracing::warn!(feed = query.name(), error = %e, "failed to refresh snapshot");
                }
            }
        }
    });

    Ok(Subscription { receiver, task })
}

/// Newest posts, bounded by `limit`.
pub async fn subscribe_posts(
    store: Arc<dyn DocumentStore>,
    limit: usize,
) -> Result<Subscription<Vec<Post>>> {
    subscribe_filtered_posts(store, PostFilter::default(), limit).await
}

pub async fn subscribe_filtered_posts(
    store: Arc<dyn DocumentStore>,
    filter: PostFilter,
    limit: usize,
) -> Result<Subscription<Vec<Post>>> {
    start(store, PostsFeed { filter, limit }).await
}

/// A single post; `None` once it is deleted.
pub async fn subscribe_post(
    store: Arc<dyn DocumentStore>,
    post_id: &str,
) -> Result<Subscription<Option<Post>>> {
    paths::ensure_id("post", post_id)?;
    start(
        store,
        PostFeed {
            post_id: post_id.to_string(),
        },
    )
    .await
}

/// Comments of a post, newest first.
pub async fn subscribe_comments(
    store: Arc<dyn DocumentStore>,
    post_id: &str,
) -> Result<Subscription<Vec<Comment>>> {
    paths::ensure_id("post", post_id)?;
    start(
        store,
        CommentsFeed {
            collection: paths::comments(post_id),
            post_id: post_id.to_string(),
        },
    )
    .await
}

/// Most used tags.
pub async fn subscribe_tags(
    store: Arc<dyn DocumentStore>,
    limit: usize,
) -> Result<Subscription<Vec<Tag>>> {
    start(store, TagsFeed { limit }).await
}

/// Users with a recent heartbeat, most recently seen first. The snapshot is
/// also refreshed periodically so silent users age out.
pub async fn subscribe_online_users(
    store: Arc<dyn DocumentStore>,
    window: TimeDelta,
    limit: usize,
) -> Result<Subscription<Vec<UserPresence>>> {
    start(store, OnlineUsersFeed { window, limit }).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{AuthorSnapshot, Badge, NewComment, NewPost, VoteType};
    use crate::services::vote_service;
    use crate::store::MemoryStore;

    fn author() -> AuthorSnapshot {
        AuthorSnapshot {
            id: "u1".to_string(),
            name: "Ana".to_string(),
            photo: String::new(),
            badge: Badge::User,
        }
    }

    fn new_post(content: &str, tags: &[&str]) -> NewPost {
        NewPost {
            author: author(),
            content: content.to_string(),
            image_url: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    async fn wait_for<T: Clone>(sub: &mut Subscription<T>, pred: impl Fn(&T) -> bool) -> T {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let current = sub.current();
                if pred(&current) {
                    return current;
                }
                sub.changed().await.expect("feed stopped");
            }
        })
        .await
        .expect("snapshot never arrived")
    }

    #[tokio::test]
    async fn post_feed_starts_with_current_state() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        post_service::create_post(store.as_ref(), new_post("first", &[])).await.unwrap();

        let sub = subscribe_posts(store.clone(), 10).await.unwrap();
        assert_eq!(sub.current().len(), 1);
        assert_eq!(sub.current()[0].content, "first");
    }

    #[tokio::test]
    async fn post_feed_follows_creates_and_votes() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut sub = subscribe_posts(store.clone(), 2).await.unwrap();
        assert!(sub.current().is_empty());

        let id = post_service::create_post(store.as_ref(), new_post("hello", &[])).await.unwrap();
        wait_for(&mut sub, |posts| posts.len() == 1).await;

        vote_service::toggle_post_vote(store.as_ref(), &id, "u2", VoteType::Like)
            .await
            .unwrap();
        let posts = wait_for(&mut sub, |posts| posts.first().is_some_and(|p| p.likes_count == 1)).await;
        assert_eq!(posts[0].id, id);

        for content in ["b", "c"] {
            tokio::time::sleep(Duration::from_millis(3)).await;
            post_service::create_post(store.as_ref(), new_post(content, &[])).await.unwrap();
        }
        let posts = wait_for(&mut sub, |posts| posts.first().is_some_and(|p| p.content == "c")).await;
        assert_eq!(posts.len(), 2);
    }

    #[tokio::test]
    async fn filtered_feed_only_sees_matching_posts() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let filter = PostFilter {
            tag: Some("iot".to_string()),
            author: None,
        };
        let mut sub = subscribe_filtered_posts(store.clone(), filter, 10).await.unwrap();

        post_service::create_post(store.as_ref(), new_post("untagged", &[])).await.unwrap();
        post_service::create_post(store.as_ref(), new_post("tagged", &["#IoT"])).await.unwrap();

        let posts = wait_for(&mut sub, |posts| !posts.is_empty()).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].content, "tagged");
    }

    #[tokio::test]
    async fn single_post_feed_reports_deletion() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let id = post_service::create_post(store.as_ref(), new_post("bye", &[])).await.unwrap();

        let mut sub = subscribe_post(store.clone(), &id).await.unwrap();
        assert!(sub.current().is_some());

        store.delete(&paths::post(&id)).await.unwrap();
        assert_eq!(wait_for(&mut sub, Option::is_none).await, None);
    }

    #[tokio::test]
    async fn comment_and_tag_feeds_refresh() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let post_id = post_service::create_post(store.as_ref(), new_post("p", &[])).await.unwrap();

        let mut comments = subscribe_comments(store.clone(), &post_id).await.unwrap();
        let mut tags = subscribe_tags(store.clone(), 5).await.unwrap();

        comment_service::create_comment(
            store.as_ref(),
            NewComment {
                post_id: post_id.clone(),
                parent_id: None,
                author: author(),
                text: "first!".to_string(),
            },
        )
        .await
        .unwrap();
        let listed = wait_for(&mut comments, |c| c.len() == 1).await;
        assert_eq!(listed[0].text, "first!");

        tag_service::register_tags(store.as_ref(), &["farm".to_string()]).await;
        let listed = wait_for(&mut tags, |t| t.len() == 1).await;
        assert_eq!(listed[0].label, "farm");
    }

    #[tokio::test]
    async fn online_feed_ages_out_silent_users() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let mut online = subscribe_online_users(store.clone(), TimeDelta::milliseconds(300), 20)
            .await
            .unwrap();
        assert!(online.current().is_empty());

        presence_service::update_presence(store.as_ref(), &author(), true)
            .await
            .unwrap();
        let users = wait_for(&mut online, |users| users.len() == 1).await;
        assert_eq!(users[0].id, "u1");

        // No further heartbeat: the periodic refresh drops the user.
        wait_for(&mut online, Vec::is_empty).await;
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_feed() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let sub = subscribe_posts(store.clone(), 10).await.unwrap();
        let mut receiver = sub.receiver.clone();

        sub.unsubscribe();
        post_service::create_post(store.as_ref(), new_post("after", &[])).await.unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(2), receiver.changed())
            .await
            .unwrap();
        assert!(closed.is_err());
    }
}
