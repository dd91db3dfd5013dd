pub mod author;
pub mod comment;
pub mod notification;
pub mod paths;
pub mod post;
pub mod presence;
pub mod tag;
pub mod vote;

pub use author::*;
pub use comment::*;
pub use notification::*;
pub use post::*;
pub use presence::*;
pub use tag::*;
pub use vote::*;
