pub mod comment_service;
pub mod comment_tree;
pub mod feed_service;
pub mod media_service;
pub mod notification_service;
pub mod post_service;
pub mod presence_service;
pub mod tag_service;
pub mod vote_service;
