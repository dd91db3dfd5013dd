use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use community_forum::{
    AppState,
    auth::Claims,
    config::Config,
    create_app,
    models::{AuthorSnapshot, Badge},
    services::media_service::LocalMediaStore,
    store::MemoryStore,
};

const SECRET: &str = "test-secret";

fn app(upload_dir: &std::path::Path) -> Router {
    let mut config = Config::for_development(SECRET);
    config.upload_dir = upload_dir.to_string_lossy().to_string();

    let media = Arc::new(LocalMediaStore::new(
        upload_dir,
        &config.public_base_url,
        config.max_upload_size,
    ));
    create_app(AppState::new(Arc::new(MemoryStore::new()), media, None, config))
}

fn token(id: &str, badge: Badge) -> String {
    let author = AuthorSnapshot {
        id: id.to_string(),
        name: format!("User {}", id),
        photo: String::new(),
        badge,
    };
    Claims::new(&author, SECRET).unwrap().0
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn posts_votes_and_comments_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());
    let alice = token("alice", Badge::User);
    let bob = token("bob", Badge::User);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/posts",
        Some(&alice),
        Some(json!({ "content": "New soil sensor #IoT", "tags": ["sensor"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let post_id = body["postId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, &format!("/api/posts/{}", post_id), Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tags"], json!(["sensor", "iot"]));
    assert_eq!(body["authorName"], "User alice");
    assert_eq!(body["userVote"], Value::Null);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/posts/{}/vote", post_id),
        Some(&bob),
        Some(json!({ "type": "like" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userVote"], "like");

    let (status, body) = send(&app, Method::GET, "/api/posts?tag=IoT", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["likesCount"], 1);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/posts/{}/comments", post_id),
        Some(&bob),
        Some(json!({ "text": "Which model?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let comment_id = body["commentId"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/posts/{}/comments", post_id),
        Some(&alice),
        Some(json!({ "text": "The cheap one", "parentId": comment_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/posts/{}/comments?tree=true", post_id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["id"], comment_id.as_str());
    assert_eq!(body[0]["depth"], 0);
    assert_eq!(body[1]["text"], "The cheap one");
    assert_eq!(body[1]["depth"], 1);
    assert_eq!(body[0]["replyIds"][0], body[1]["id"]);

    let (_, body) = send(&app, Method::GET, "/api/tags", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn rejects_unauthorized_and_invalid_requests() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());
    let alice = token("alice", Badge::User);
    let bob = token("bob", Badge::User);
    let admin = token("root", Badge::Admin);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/posts",
        None,
        Some(json!({ "content": "anonymous" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/posts",
        Some(&alice),
        Some(json!({ "content": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/api/posts/missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/posts",
        Some(&alice),
        Some(json!({ "content": "mine" })),
    )
    .await;
    let post_id = body["postId"].as_str().unwrap().to_string();

    let (status, _) = send(&app, Method::DELETE, &format!("/api/posts/{}", post_id), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/admin/posts/{}", post_id),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/api/admin/posts/{}", post_id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["postId"], post_id.as_str());

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/posts/{}/vote", post_id),
        Some(&bob),
        Some(json!({ "type": "like" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn presence_heartbeats_list_online_users() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());
    let alice = token("alice", Badge::Admin);

    let (status, _) = send(&app, Method::POST, "/api/presence", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, Method::POST, "/api/presence", Some(&alice), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["online"], true);

    let (status, body) = send(&app, Method::GET, "/api/presence/online", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], "alice");
    assert_eq!(body[0]["displayName"], "User alice");
    assert_eq!(body[0]["badge"], "admin");
    assert_eq!(body[0]["isOnline"], true);

    send(
        &app,
        Method::POST,
        "/api/presence",
        Some(&alice),
        Some(json!({ "online": false })),
    )
    .await;
    let (_, body) = send(&app, Method::GET, "/api/presence/online", None, None).await;
    assert!(body.as_array().unwrap().is_empty());
}
