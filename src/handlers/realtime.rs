use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use chrono::TimeDelta;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use serde_json::json;

use crate::{
    AppState,
    error::Result,
    handlers::posts::MAX_PAGE_SIZE,
    models::{ListOnlineUsersQuery, ListPostsQuery, ListTagsQuery, PostFilter},
    services::{
        feed_service::{self, Subscription},
        presence_service::DEFAULT_ONLINE_LIMIT,
    },
};

pub async fn posts_feed(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ListPostsQuery>,
) -> Result<Response> {
    let limit = params
        .limit
        .unwrap_or(state.config.feed_default_limit)
        .clamp(1, MAX_PAGE_SIZE);
    let filter = PostFilter {
        tag: params.tag,
        author: params.author,
    };

    let subscription =
        feed_service::subscribe_filtered_posts(state.store.clone(), filter, limit).await?;
    Ok(ws.on_upgrade(move |socket| stream_snapshots(socket, subscription, "posts")))
}

pub async fn post_feed(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<Response> {
    let subscription = feed_service::subscribe_post(state.store.clone(), &post_id).await?;
    Ok(ws.on_upgrade(move |socket| stream_snapshots(socket, subscription, "post")))
}

pub async fn comments_feed(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<Response> {
    let subscription = feed_service::subscribe_comments(state.store.clone(), &post_id).await?;
    Ok(ws.on_upgrade(move |socket| stream_snapshots(socket, subscription, "comments")))
}

pub async fn tags_feed(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ListTagsQuery>,
) -> Result<Response> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let subscription = feed_service::subscribe_tags(state.store.clone(), limit).await?;
    Ok(ws.on_upgrade(move |socket| stream_snapshots(socket, subscription, "tags")))
}

pub async fn online_feed(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ListOnlineUsersQuery>,
) -> Result<Response> {
    let limit = params.limit.unwrap_or(DEFAULT_ONLINE_LIMIT).clamp(1, 100);
    let window = TimeDelta::seconds(state.config.presence_window_secs);
    let subscription = feed_service::subscribe_online_users(state.store.clone(), window, limit).await?;
    Ok(ws.on_upgrade(move |socket| stream_snapshots(socket, subscription, "online")))
}

// Pushes the current snapshot, then every new one, until either side goes away.
async fn stream_snapshots<T>(socket: WebSocket, mut subscription: Subscription<T>, feed: &'static str)
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    let mut snapshot = Some(subscription.current());
    loop {
        if let Some(data) = snapshot.take() {
            let message = json!({ "type": "snapshot", "feed": feed, "data": data });
            if sender
                .send(Message::Text(message.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }

        tokio::select! {
            next = subscription.changed() => match next {
                Some(data) => snapshot = Some(data),
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(feed, "websocket feed closed");
    subscription.unsubscribe();
}
