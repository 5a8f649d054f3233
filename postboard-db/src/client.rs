use crate::record::{CredentialsRecord, FeedPostRecord, PostRecord, SessionRecord, UserRecord};
use postboard_common::{
    model::{
        Id, ModelValidationError,
        auth::{Session, SessionTokenHash},
        like::LikeToggle,
        post::{CreatePost, FeedPost, Post, PostMarker},
        user::{Email, NewUser, User, UserCredentials, UserMarker},
    },
    util::PositiveDuration,
};
use sqlx::{
    SqlitePool, query, query_as, query_scalar,
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::str::FromStr;
use thiserror::Error;
use time::{PrimitiveDateTime, UtcDateTime};
use tracing::info;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("A user with this email address already exists")]
    EmailTaken,
    #[error("Database migration failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Clone, Debug)]
pub struct DbClient {
    pool: SqlitePool,
}

fn now() -> PrimitiveDateTime {
    let now = UtcDateTime::now();
    PrimitiveDateTime::new(now.date(), now.time())
}

impl DbClient {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<Id<UserMarker>> {
        let user_id = query_scalar::<_, i64>(
            "
            INSERT INTO users (name, email, password_hash)
            VALUES (?1, ?2, ?3)
            RETURNING user_id
            ",
        )
        .bind(user.name.get())
        .bind(user.email.get())
        .bind(user.password_hash.as_phc_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DbError::EmailTaken,
            err => DbError::Sqlx(err),
        })?;

        Ok(user_id.into())
    }

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_id,
                users.name
            FROM
                users
            WHERE
                users.user_id = ?1
            ",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn fetch_credentials(&self, email: &Email) -> Result<Option<UserCredentials>> {
        let record = query_as::<_, CredentialsRecord>(
            "
            SELECT
                users.user_id,
                users.name,
                users.password_hash
            FROM
                users
            WHERE
                users.email = ?1
            ",
        )
        .bind(email.get())
        .fetch_optional(&self.pool)
        .await?;

        let credentials = record.map(UserCredentials::try_from).transpose()?;
        Ok(credentials)
    }

    pub async fn create_post(&self, post: &CreatePost) -> Result<Id<PostMarker>> {
        let post_id = query_scalar::<_, i64>(
            "
            INSERT INTO posts (content, image, user_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING post_id
            ",
        )
        .bind(&post.content)
        .bind(post.image.as_ref().map(|image| image.get()))
        .bind(post.author.get())
        .bind(now())
        .fetch_one(&self.pool)
        .await?;

        Ok(post_id.into())
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT
                posts.post_id,
                posts.content,
                posts.image,
                posts.created_at,
                users.user_id,
                users.name,
                (SELECT COUNT(*) FROM likes WHERE likes.post_id = posts.post_id) AS like_count
            FROM
                posts JOIN users ON users.user_id = posts.user_id
            WHERE
                posts.post_id = ?1
            ",
        )
        .bind(post_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    /// Every post, newest first, annotated for `viewer`.
    pub async fn fetch_feed(&self, viewer: Id<UserMarker>) -> Result<Vec<FeedPost>> {
        let records = query_as::<_, FeedPostRecord>(
            "
            SELECT
                posts.post_id,
                posts.content,
                posts.image,
                posts.created_at,
                users.user_id,
                users.name,
                (SELECT COUNT(*) FROM likes WHERE likes.post_id = posts.post_id) AS like_count,
                EXISTS (
                    SELECT 1 FROM likes
                    WHERE likes.post_id = posts.post_id AND likes.user_id = ?1
                ) AS liked_by_viewer
            FROM
                posts JOIN users ON users.user_id = posts.user_id
            ORDER BY
                posts.created_at DESC, posts.post_id DESC
            ",
        )
        .bind(viewer.get())
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(FeedPost::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    /// Posts written by `author`, newest first, annotated for `viewer`.
    pub async fn fetch_user_posts(
        &self,
        author: Id<UserMarker>,
        viewer: Id<UserMarker>,
    ) -> Result<Vec<FeedPost>> {
        let records = query_as::<_, FeedPostRecord>(
            "
            SELECT
                posts.post_id,
                posts.content,
                posts.image,
                posts.created_at,
                users.user_id,
                users.name,
                (SELECT COUNT(*) FROM likes WHERE likes.post_id = posts.post_id) AS like_count,
                EXISTS (
                    SELECT 1 FROM likes
                    WHERE likes.post_id = posts.post_id AND likes.user_id = ?2
                ) AS liked_by_viewer
            FROM
                posts JOIN users ON users.user_id = posts.user_id
            WHERE
                posts.user_id = ?1
            ORDER BY
                posts.created_at DESC, posts.post_id DESC
            ",
        )
        .bind(author.get())
        .bind(viewer.get())
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(FeedPost::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    /// Returns `false` if the post does not exist.
    pub async fn update_post_content(&self, post_id: Id<PostMarker>, content: &str) -> Result<bool> {
        let result = query("UPDATE posts SET content = ?1 WHERE post_id = ?2")
            .bind(content)
            .bind(post_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes the post and its likes. Returns `false` if the post does not exist.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let result = query("DELETE FROM posts WHERE post_id = ?1")
            .bind(post_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes the like if present, adds it otherwise. `None` if the post does not exist.
    pub async fn toggle_like(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<Option<LikeToggle>> {
        let mut tx = self.pool.begin().await?;

        let post_exists =
            query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM posts WHERE post_id = ?1)")
                .bind(post_id.get())
                .fetch_one(&mut *tx)
                .await?;
        if !post_exists {
            return Ok(None);
        }

        let removed = query("DELETE FROM likes WHERE user_id = ?1 AND post_id = ?2")
            .bind(user_id.get())
            .bind(post_id.get())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let toggle = if removed > 0 {
            LikeToggle::Unliked
        } else {
            query(
                "
                INSERT INTO likes (user_id, post_id)
                VALUES (?1, ?2)
                ON CONFLICT (user_id, post_id) DO NOTHING
                ",
            )
            .bind(user_id.get())
            .bind(post_id.get())
            .execute(&mut *tx)
            .await?;
            LikeToggle::Liked
        };

        tx.commit().await?;
        Ok(Some(toggle))
    }

    pub async fn create_session(
        &self,
        token_hash: &SessionTokenHash,
        user_id: Id<UserMarker>,
        expires_after: Option<PositiveDuration>,
    ) -> Result<()> {
        query(
            "
            INSERT INTO sessions (token_hash, user_id, created_at, expires_after_seconds)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(&token_hash.0[..])
        .bind(user_id.get())
        .bind(now())
        .bind(expires_after.map(|duration| duration.whole_seconds()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_session(&self, token_hash: &SessionTokenHash) -> Result<Option<Session>> {
        let record = query_as::<_, SessionRecord>(
            "
            SELECT
                sessions.token_hash,
                sessions.created_at,
                sessions.expires_after_seconds,
                users.user_id,
                users.name
            FROM
                sessions JOIN users ON users.user_id = sessions.user_id
            WHERE
                sessions.token_hash = ?1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let session = record.map(Session::try_from).transpose()?;
        Ok(session)
    }

    pub async fn delete_session(&self, token_hash: &SessionTokenHash) -> Result<()> {
        query("DELETE FROM sessions WHERE token_hash = ?1")
            .bind(&token_hash.0[..])
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{DbClient, DbError};
    use postboard_common::{
        model::{
            Id,
            auth::{HashedPassword, SessionToken},
            image::ImageFileName,
            like::LikeToggle,
            post::{CreatePost, PostMarker},
            user::{Email, NewUser, UserMarker, UserName},
        },
        util::PositiveDuration,
    };
    use sqlx::sqlite::SqlitePoolOptions;

    async fn client() -> DbClient {
        // A single connection that never closes keeps the in-memory database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let client = DbClient::new(pool);
        client.migrate().await.unwrap();
        client
    }

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: UserName::new(name.to_owned()).unwrap(),
            email: Email::new(email.to_owned()).unwrap(),
            password_hash: HashedPassword::from_phc_string(format!("hash of {name}")),
        }
    }

    async fn post(client: &DbClient, author: Id<UserMarker>, content: &str) -> Id<PostMarker> {
        client
            .create_post(&CreatePost {
                author,
                content: content.to_owned(),
                image: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn users_round_trip() {
        let client = client().await;
        let id = client
            .create_user(&new_user("Ada", "ada@example.com"))
            .await
            .unwrap();

        let user = client.fetch_user(id).await.unwrap().unwrap();
        assert_eq!(user.name.get(), "Ada");

        let credentials = client
            .fetch_credentials(&Email::new("ada@example.com".to_owned()).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credentials.user, user);
        assert_eq!(credentials.password_hash.as_phc_str(), "hash of Ada");

        assert!(client.fetch_user(Id::new(999)).await.unwrap().is_none());
        assert!(
            client
                .fetch_credentials(&Email::new("nobody@example.com".to_owned()).unwrap())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let client = client().await;
        client
            .create_user(&new_user("Ada", "ada@example.com"))
            .await
            .unwrap();

        let result = client
            .create_user(&new_user("Impostor", "ada@example.com"))
            .await;
        assert!(matches!(result, Err(DbError::EmailTaken)));
    }

    #[tokio::test]
    async fn feed_is_newest_first() {
        let client = client().await;
        let ada = client
            .create_user(&new_user("Ada", "ada@example.com"))
            .await
            .unwrap();
        let bob = client
            .create_user(&new_user("Bob", "bob@example.com"))
            .await
            .unwrap();

        let first = post(&client, ada, "first").await;
        let second = post(&client, bob, "second").await;
        let third = post(&client, ada, "third").await;

        let feed = client.fetch_feed(ada).await.unwrap();
        let ids: Vec<_> = feed.iter().map(|entry| entry.post.id).collect();
        assert_eq!(ids, [third, second, first]);
        assert_eq!(feed[1].post.author.name.get(), "Bob");

        let ada_posts = client.fetch_user_posts(ada, bob).await.unwrap();
        let ids: Vec<_> = ada_posts.iter().map(|entry| entry.post.id).collect();
        assert_eq!(ids, [third, first]);
    }

    #[tokio::test]
    async fn posts_keep_their_image() {
        let client = client().await;
        let ada = client
            .create_user(&new_user("Ada", "ada@example.com"))
            .await
            .unwrap();
        let image = ImageFileName::from_upload("cat.png");

        let id = client
            .create_post(&CreatePost {
                author: ada,
                content: "look".to_owned(),
                image: image.clone(),
            })
            .await
            .unwrap();

        let post = client.fetch_post(id).await.unwrap().unwrap();
        assert_eq!(post.image, image);
        assert_eq!(post.author.id, ada);
        assert_eq!(post.like_count, 0);
    }

    #[tokio::test]
    async fn like_toggles() {
        let client = client().await;
        let ada = client
            .create_user(&new_user("Ada", "ada@example.com"))
            .await
            .unwrap();
        let bob = client
            .create_user(&new_user("Bob", "bob@example.com"))
            .await
            .unwrap();
        let id = post(&client, ada, "like me").await;

        assert_eq!(
            client.toggle_like(bob, id).await.unwrap(),
            Some(LikeToggle::Liked)
        );
        let feed = client.fetch_feed(bob).await.unwrap();
        assert!(feed[0].liked_by_viewer);
        assert_eq!(feed[0].post.like_count, 1);
        assert!(!client.fetch_feed(ada).await.unwrap()[0].liked_by_viewer);

        assert_eq!(
            client.toggle_like(bob, id).await.unwrap(),
            Some(LikeToggle::Unliked)
        );
        let feed = client.fetch_feed(bob).await.unwrap();
        assert!(!feed[0].liked_by_viewer);
        assert_eq!(feed[0].post.like_count, 0);

        assert_eq!(client.toggle_like(bob, Id::new(999)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn edit_and_delete() {
        let client = client().await;
        let ada = client
            .create_user(&new_user("Ada", "ada@example.com"))
            .await
            .unwrap();
        let id = post(&client, ada, "draft").await;
        client.toggle_like(ada, id).await.unwrap();

        assert!(client.update_post_content(id, "final").await.unwrap());
        assert_eq!(client.fetch_post(id).await.unwrap().unwrap().content, "final");

        assert!(client.delete_post(id).await.unwrap());
        assert!(client.fetch_post(id).await.unwrap().is_none());
        assert!(client.fetch_feed(ada).await.unwrap().is_empty());
        assert!(client.fetch_user_posts(ada, ada).await.unwrap().is_empty());

        assert!(!client.delete_post(id).await.unwrap());
        assert!(!client.update_post_content(id, "gone").await.unwrap());
    }

    #[tokio::test]
    async fn sessions_round_trip() {
        let client = client().await;
        let ada = client
            .create_user(&new_user("Ada", "ada@example.com"))
            .await
            .unwrap();
        let hash = SessionToken::generate_random(ada).hash().unwrap();

        client
            .create_session(&hash, ada, PositiveDuration::from_seconds(60))
            .await
            .unwrap();

        let session = client.fetch_session(&hash).await.unwrap().unwrap();
        assert_eq!(session.user.id, ada);
        assert_eq!(session.token_hash, hash);
        assert_eq!(session.expires_after, PositiveDuration::from_seconds(60));

        client.delete_session(&hash).await.unwrap();
        assert!(client.fetch_session(&hash).await.unwrap().is_none());
    }
}
