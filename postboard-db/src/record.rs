use postboard_common::{
    model::{
        ModelValidationError,
        auth::{HashedPassword, Session},
        image::ImageFileName,
        post::{FeedPost, Post},
        user::{User, UserCredentials, UserName},
    },
    util::PositiveDuration,
};
use sqlx::FromRow;
use time::{Duration, PrimitiveDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_id: i64,
    pub name: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct CredentialsRecord {
    #[sqlx(flatten)]
    pub user: UserRecord,
    pub password_hash: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_id: i64,
    pub content: String,
    pub image: Option<String>,
    pub created_at: PrimitiveDateTime,
    #[sqlx(flatten)]
    pub author: UserRecord,
    pub like_count: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FeedPostRecord {
    #[sqlx(flatten)]
    pub post: PostRecord,
    pub liked_by_viewer: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct SessionRecord {
    pub token_hash: Vec<u8>,
    pub created_at: PrimitiveDateTime,
    pub expires_after_seconds: Option<i64>,
    #[sqlx(flatten)]
    pub user: UserRecord,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.user_id.into(),
            name: UserName::new(value.name)?,
        })
    }
}

impl TryFrom<CredentialsRecord> for UserCredentials {
    type Error = ModelValidationError;

    fn try_from(value: CredentialsRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user.try_into()?,
            password_hash: HashedPassword::from_phc_string(value.password_hash),
        })
    }
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.post_id.into(),
            author: value.author.try_into()?,
            content: value.content,
            image: value.image.map(ImageFileName::new).transpose()?,
            created_at: value.created_at.as_utc(),
            like_count: value.like_count.cast_unsigned(),
        })
    }
}

impl TryFrom<FeedPostRecord> for FeedPost {
    type Error = ModelValidationError;

    fn try_from(value: FeedPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            post: value.post.try_into()?,
            liked_by_viewer: value.liked_by_viewer,
        })
    }
}

impl TryFrom<SessionRecord> for Session {
    type Error = ModelValidationError;

    fn try_from(value: SessionRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: value.user.try_into()?,
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at.as_utc(),
            expires_after: value
                .expires_after_seconds
                .map(|seconds| PositiveDuration::try_from(Duration::seconds(seconds)))
                .transpose()?,
        })
    }
}
