pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod redis;
pub mod services;
pub mod store;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{
        HeaderValue, Method,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    config::Config,
    error::{AppError, Result},
    redis::RedisClient,
    services::{media_service::MediaStore, notification_service::NotificationService},
    store::DocumentStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub media: Arc<dyn MediaStore>,
    pub notifications: Arc<NotificationService>,
    pub redis: Option<Arc<RedisClient>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaStore>,
        redis: Option<Arc<RedisClient>>,
        config: Config,
    ) -> Self {
        Self {
            notifications: Arc::new(NotificationService::new(store.clone())),
            store,
            media,
            redis,
            config: Arc::new(config),
        }
    }

    /// Fails with `RateLimit` once `key` exceeds `limit` hits per window.
    /// Without Redis nothing is limited.
    pub async fn check_rate_limit(&self, key: &str, limit: u32, window_seconds: usize) -> Result<()> {
        let Some(redis) = &self.redis else {
            return Ok(());
        };

        if !redis.check_rate_limit(key, limit, window_seconds).await? {
            return Err(AppError::RateLimit);
        }
        Ok(())
    }
}

pub fn create_app(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE]);

    // Multipart framing needs a little room on top of the file itself.
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_size + 64 * 1024);

    let api_routes = Router::new()
        // Post routes
        .route(
            "/api/posts",
            get(handlers::posts::get_posts).post(handlers::posts::create_post),
        )
        .route(
            "/api/posts/{id}",
            get(handlers::posts::get_post).delete(handlers::posts::delete_post),
        )
        .route(
            "/api/admin/posts/{id}",
            delete(handlers::posts::admin_delete_post),
        )
        .route(
            "/api/posts/{id}/vote",
            get(handlers::posts::get_post_vote).post(handlers::posts::vote_post),
        )
        // Comment routes
        .route(
            "/api/posts/{id}/comments",
            get(handlers::comments::get_post_comments).post(handlers::comments::create_comment),
        )
        .route(
            "/api/posts/{id}/comments/{comment_id}",
            delete(handlers::comments::delete_comment),
        )
        .route(
            "/api/posts/{id}/comments/{comment_id}/vote",
            get(handlers::comments::get_comment_vote).post(handlers::comments::vote_comment),
        )
        // Tag routes
        .route("/api/tags", get(handlers::tags::get_tags))
        // Notification routes
        .route(
            "/api/notifications",
            get(handlers::notifications::get_notifications),
        )
        .route(
            "/api/notifications/unread-count",
            get(handlers::notifications::get_unread_count),
        )
        .route(
            "/api/notifications/{id}/read",
            post(handlers::notifications::mark_notification_read),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::mark_all_notifications_read),
        )
        // Presence routes
        .route("/api/presence", post(handlers::presence::update_presence))
        .route(
            "/api/presence/online",
            get(handlers::presence::get_online_users),
        )
        // Upload routes
        .route(
            "/api/upload",
            post(handlers::upload::upload_image).layer(upload_limit),
        );

    let realtime_routes = Router::new()
        .route("/ws/posts", get(handlers::realtime::posts_feed))
        .route("/ws/posts/{id}", get(handlers::realtime::post_feed))
        .route(
            "/ws/posts/{id}/comments",
            get(handlers::realtime::comments_feed),
        )
        .route("/ws/tags", get(handlers::realtime::tags_feed))
        .route("/ws/online", get(handlers::realtime::online_feed));

    let upload_dir = state.config.upload_dir.clone();

    Router::new()
        .merge(api_routes)
        .merge(realtime_routes)
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
