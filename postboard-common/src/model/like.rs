/// Outcome of toggling a like on a post.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum LikeToggle {
    Liked,
    Unliked,
}
