pub mod comments;
pub mod notifications;
pub mod posts;
pub mod presence;
pub mod realtime;
pub mod tags;
pub mod upload;
