use std::sync::Arc;
use std::time::Duration;

use community_forum::error::AppError;
use community_forum::models::{AuthorSnapshot, Badge, NewComment, NewPost, VoteType, paths};
use community_forum::services::media_service::{LocalMediaStore, MediaStore};
use community_forum::services::{
    comment_service, comment_tree, feed_service, post_service, tag_service, vote_service,
};
use community_forum::store::{DocumentStore, MemoryStore};

fn author(id: &str) -> AuthorSnapshot {
    AuthorSnapshot {
        id: id.to_string(),
        name: format!("User {}", id),
        photo: format!("https://img.example/{}.png", id),
        badge: Badge::User,
    }
}

fn post(author_id: &str, content: &str, tags: &[&str]) -> NewPost {
    NewPost {
        author: author(author_id),
        content: content.to_string(),
        image_url: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn comment(post_id: &str, parent_id: Option<&str>, author_id: &str, text: &str) -> NewComment {
    NewComment {
        post_id: post_id.to_string(),
        parent_id: parent_id.map(str::to_string),
        author: author(author_id),
        text: text.to_string(),
    }
}

async fn counters(store: &dyn DocumentStore, post_id: &str) -> (i64, i64, i64) {
    let post = post_service::get_post(store, post_id).await.unwrap().unwrap();
    (post.likes_count, post.dislikes_count, post.comments_count)
}

#[tokio::test]
async fn post_vote_and_comment_scenario() {
    let store = MemoryStore::new();

    let post_id = post_service::create_post(&store, post("author", "Soil sensors", &["sensor", "#Sensor"]))
        .await
        .unwrap();
    let tags = tag_service::list_tags(&store, 10).await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].label, "sensor");
    assert_eq!(tags[0].usage_count, 1);

    let vote = vote_service::toggle_post_vote(&store, &post_id, "a", VoteType::Like).await.unwrap();
    assert_eq!(vote, Some(VoteType::Like));
    assert_eq!(counters(&store, &post_id).await, (1, 0, 0));

    let vote = vote_service::toggle_post_vote(&store, &post_id, "a", VoteType::Like).await.unwrap();
    assert_eq!(vote, None);
    assert_eq!(counters(&store, &post_id).await, (0, 0, 0));

    let vote = vote_service::toggle_post_vote(&store, &post_id, "a", VoteType::Dislike).await.unwrap();
    assert_eq!(vote, Some(VoteType::Dislike));
    assert_eq!(counters(&store, &post_id).await, (0, 1, 0));

    let c1 = comment_service::create_comment(&store, comment(&post_id, None, "a", "first"))
        .await
        .unwrap();
    assert_eq!(counters(&store, &post_id).await.2, 1);

    let c2 = comment_service::create_comment(&store, comment(&post_id, Some(&c1), "b", "reply"))
        .await
        .unwrap();
    assert_eq!(counters(&store, &post_id).await.2, 2);

    let comments = comment_service::list_comments(&store, &post_id).await.unwrap();
    let forest = comment_tree::build_tree(&comments);
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0].comment.id, c1);
    assert_eq!(forest[0].replies.len(), 1);
    assert_eq!(forest[0].replies[0].comment.id, c2);
}

#[tokio::test]
async fn deleting_a_post_removes_everything_beneath_it() {
    let dir = tempfile::tempdir().unwrap();
    let media = LocalMediaStore::new(dir.path(), "http://localhost:3000", 1024 * 1024);
    let memory = MemoryStore::new();
    let store: Arc<dyn DocumentStore> = Arc::new(memory.clone());

    let mut png = Vec::new();
    image::RgbImage::from_pixel(1, 1, image::Rgb([0, 0, 0]))
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    let image_url = media.upload(png, "image/png", "posts").await.unwrap();

    let mut input = post("author", "with photo", &["farm"]);
    input.image_url = Some(image_url.clone());
    let post_id = post_service::create_post(store.as_ref(), input).await.unwrap();
    let keep_id = post_service::create_post(store.as_ref(), post("other", "stays", &[]))
        .await
        .unwrap();

    let c1 = comment_service::create_comment(store.as_ref(), comment(&post_id, None, "a", "hi"))
        .await
        .unwrap();
    comment_service::create_comment(store.as_ref(), comment(&post_id, Some(&c1), "b", "hey"))
        .await
        .unwrap();
    vote_service::toggle_post_vote(store.as_ref(), &post_id, "a", VoteType::Like)
        .await
        .unwrap();
    vote_service::toggle_post_vote(store.as_ref(), &post_id, "b", VoteType::Dislike)
        .await
        .unwrap();
    vote_service::toggle_comment_vote(store.as_ref(), &post_id, &c1, "author", VoteType::Like)
        .await
        .unwrap();

    let mut single = feed_service::subscribe_post(store.clone(), &post_id).await.unwrap();
    let mut feed = feed_service::subscribe_posts(store.clone(), 10).await.unwrap();
    let mut comments = feed_service::subscribe_comments(store.clone(), &post_id).await.unwrap();
    assert_eq!(feed.current().len(), 2);
    assert_eq!(comments.current().len(), 2);

    let report = post_service::delete_own_post(store.as_ref(), &media, &post_id, "author")
        .await
        .unwrap();
    assert_eq!(report.post_votes_deleted, 2);
    assert_eq!(report.comments_deleted, 2);
    assert_eq!(report.comment_votes_deleted, 1);
    assert!(report.media_removed);

    assert_eq!(memory.count_under(&paths::post(&post_id).key()), 0);
    assert!(post_service::get_post(store.as_ref(), &keep_id).await.unwrap().is_some());
    assert!(std::fs::read_dir(dir.path().join("posts")).unwrap().next().is_none());

    tokio::time::timeout(Duration::from_secs(2), async {
        while single.current().is_some() {
            single.changed().await;
        }
        while feed.current().iter().any(|p| p.id == post_id) {
            feed.changed().await;
        }
        while !comments.current().is_empty() {
            comments.changed().await;
        }
    })
    .await
    .unwrap();

    let remaining: Vec<_> = feed.current().into_iter().map(|p| p.id).collect();
    assert_eq!(remaining, vec![keep_id]);
}

#[tokio::test]
async fn commenting_on_a_deleted_post_fails_cleanly() {
    let store = MemoryStore::new();
    let media = LocalMediaStore::new("./unused-uploads", "http://localhost:3000", 1024);

    let post_id = post_service::create_post(&store, post("author", "short lived", &[]))
        .await
        .unwrap();
    post_service::delete_own_post(&store, &media, &post_id, "author")
        .await
        .unwrap();

    let err = comment_service::create_comment(&store, comment(&post_id, None, "a", "too late"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(store.count_under(&paths::post(&post_id).key()), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_comments_and_votes_keep_counters_exact() {
    let store = MemoryStore::with_max_attempts(50);
    let post_id = post_service::create_post(&store, post("author", "busy thread", &[]))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..12 {
        let store = store.clone();
        let post_id = post_id.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("user-{}", i);
            comment_service::create_comment(&store, comment(&post_id, None, &user, "me too"))
                .await
                .map(|_| ())?;
            vote_service::toggle_post_vote(&store, &post_id, &user, VoteType::Like)
                .await
                .map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(counters(&store, &post_id).await, (12, 0, 12));
}
