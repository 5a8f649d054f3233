use crate::model::{
    Id,
    image::ImageFileName,
    user::{User, UserMarker},
};
use time::{UtcDateTime, format_description::BorrowedFormatItem, macros::format_description};

const CREATED_AT_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute] UTC");

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub content: String,
    pub image: Option<ImageFileName>,
    pub created_at: UtcDateTime,
    pub like_count: u64,
}

impl Post {
    #[must_use]
    pub fn created_at_display(&self) -> String {
        self.created_at
            .format(CREATED_AT_FORMAT)
            .unwrap_or_default()
    }
}

/// A post as seen by a particular logged in user.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct FeedPost {
    pub post: Post,
    pub liked_by_viewer: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreatePost {
    pub author: Id<UserMarker>,
    pub content: String,
    pub image: Option<ImageFileName>,
}
