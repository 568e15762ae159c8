use crate::model::{Id, Version, post::PostMarker, user::Author};
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

/// A comment on a post. `parent_id` is `None` for top-level comments and points
/// at another comment of the same post for replies.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub parent_id: Option<Id<CommentMarker>>,
    pub author: Author,
    pub content: String,
    pub version: Version,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

impl Comment {
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct CreateComment {
    pub post_id: Id<PostMarker>,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<Id<CommentMarker>>,
}
