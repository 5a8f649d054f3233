use crate::server::{
    Result, ServerError, ServerRouter, UploadStore,
    auth::AuthenticatedUser,
    flash::{self, FlashMessage},
    form::Form,
    html::{Html, Layout},
    routes::FEED_PATH,
};
use askama::Template;
use axum::{
    Router,
    extract::{Multipart, State, multipart::MultipartRejection},
    response::Redirect,
};
use axum_extra::{
    extract::SignedCookieJar,
    routing::{RouterExt, TypedPath},
};
use postboard_common::model::{
    Id,
    image::ImageFileName,
    post::{CreatePost, FeedPost, Post, PostMarker},
    user::UserMarker,
};
use postboard_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn routes() -> ServerRouter {
    Router::new()
        .typed_get(feed)
        .typed_get(create_form)
        .typed_post(create)
        .typed_post(like)
        .typed_post(delete)
        .typed_post(edit)
}

/// A post prepared for display to the current user.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct PostView {
    pub post: Post,
    pub liked: bool,
    pub owned: bool,
}

impl PostView {
    pub fn for_viewer(entry: FeedPost, viewer: Id<UserMarker>) -> Self {
        Self {
            owned: entry.post.author.id == viewer,
            liked: entry.liked_by_viewer,
            post: entry.post,
        }
    }

    pub fn all_for_viewer(entries: Vec<FeedPost>, viewer: Id<UserMarker>) -> Vec<Self> {
        entries
            .into_iter()
            .map(|entry| Self::for_viewer(entry, viewer))
            .collect()
    }
}

/// Looks up a post the current user is about to change.
async fn fetch_owned_post(
    db: &DbClient,
    id: Id<PostMarker>,
    user: &AuthenticatedUser,
) -> Result<Post> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    if post.author.id != user.user_id() {
        return Err(ServerError::NotPostOwner {
            post: id,
            user: user.user_id(),
        });
    }

    Ok(post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/feed", rejection(ServerError))]
struct FeedPath();

#[derive(Template)]
#[template(path = "feed.html")]
struct FeedTemplate {
    layout: Layout,
    posts: Vec<PostView>,
}

async fn feed(
    FeedPath(): FeedPath,
    user: AuthenticatedUser,
    State(db): State<Arc<DbClient>>,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Html<FeedTemplate>)> {
    let entries = db.fetch_feed(user.user_id()).await?;
    let posts = PostView::all_for_viewer(entries, user.user_id());

    let (jar, flashes) = flash::take(jar);
    let layout = Layout {
        viewer: Some(user.user().clone()),
        flashes,
    };

    Ok((jar, Html(FeedTemplate { layout, posts })))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/create", rejection(ServerError))]
struct CreatePath();

#[derive(Template)]
#[template(path = "create_post.html")]
struct CreatePostTemplate {
    layout: Layout,
}

async fn create_form(
    CreatePath(): CreatePath,
    user: AuthenticatedUser,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Html<CreatePostTemplate>) {
    let (jar, flashes) = flash::take(jar);
    let layout = Layout {
        viewer: Some(user.user().clone()),
        flashes,
    };

    (jar, Html(CreatePostTemplate { layout }))
}

async fn create(
    CreatePath(): CreatePath,
    user: AuthenticatedUser,
    State(db): State<Arc<DbClient>>,
    State(uploads): State<Arc<UploadStore>>,
    jar: SignedCookieJar,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(SignedCookieJar, Redirect)> {
    let mut multipart = multipart?;
    let mut content = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("content") => content = Some(field.text().await?),
            Some("image") => {
                let Some(name) = field.file_name().and_then(ImageFileName::from_upload) else {
                    debug!(file_name = ?field.file_name(), "Ignoring upload with a disallowed name");
                    continue;
                };
                image = Some((name, field.bytes().await?));
            }
            _ => {}
        }
    }

    let content = content.ok_or(ServerError::MissingFormField("content"))?;

    // The file only hits the disk once a post refers to it.
    let post_id = db
        .create_post(&CreatePost {
            author: user.user_id(),
            content,
            image: image.as_ref().map(|(name, _)| name.clone()),
        })
        .await?;
    info!(post = %post_id, user = %user.user_id(), "Post created");

    if let Some((name, contents)) = image {
        uploads.save(&name, &contents).await.map_err(|err| {
            warn!(post = %post_id, image = %name, "Post was stored without its image file");
            ServerError::Upload(err)
        })?;
    }

    let jar = flash::push(jar, FlashMessage::success("Post created!"));
    Ok((jar, Redirect::to(FEED_PATH)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/like/{id}", rejection(ServerError))]
struct LikePath {
    id: Id<PostMarker>,
}

async fn like(
    LikePath { id }: LikePath,
    user: AuthenticatedUser,
    State(db): State<Arc<DbClient>>,
) -> Result<Redirect> {
    let toggle = db
        .toggle_like(user.user_id(), id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    debug!(post = %id, user = %user.user_id(), ?toggle, "Like toggled");

    Ok(Redirect::to(FEED_PATH))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/delete/{id}", rejection(ServerError))]
struct DeletePath {
    id: Id<PostMarker>,
}

async fn delete(
    DeletePath { id }: DeletePath,
    user: AuthenticatedUser,
    State(db): State<Arc<DbClient>>,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Redirect)> {
    fetch_owned_post(&db, id, &user).await?;

    if !db.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }
    info!(post = %id, user = %user.user_id(), "Post deleted");

    let jar = flash::push(jar, FlashMessage::info("Post deleted!"));
    Ok((jar, Redirect::to(FEED_PATH)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/edit/{id}", rejection(ServerError))]
struct EditPath {
    id: Id<PostMarker>,
}

#[derive(Deserialize)]
struct EditForm {
    new_content: String,
}

async fn edit(
    EditPath { id }: EditPath,
    user: AuthenticatedUser,
    State(db): State<Arc<DbClient>>,
    jar: SignedCookieJar,
    Form(form): Form<EditForm>,
) -> Result<(SignedCookieJar, Redirect)> {
    fetch_owned_post(&db, id, &user).await?;

    if !db.update_post_content(id, &form.new_content).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }
    info!(post = %id, user = %user.user_id(), "Post edited");

    let jar = flash::push(jar, FlashMessage::success("Post updated!"));
    Ok((jar, Redirect::to(FEED_PATH)))
}
