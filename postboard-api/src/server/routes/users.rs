use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    flash,
    html::{Html, Layout},
    routes::posts::PostView,
};
use askama::Template;
use axum::{Router, extract::State};
use axum_extra::{
    extract::SignedCookieJar,
    routing::{RouterExt, TypedPath},
};
use postboard_common::model::{
    Id,
    user::{User, UserMarker},
};
use postboard_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    Router::new().typed_get(profile)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/profile/{id}", rejection(ServerError))]
struct ProfilePath {
    id: Id<UserMarker>,
}

#[derive(Template)]
#[template(path = "profile.html")]
struct ProfileTemplate {
    layout: Layout,
    profile: User,
    posts: Vec<PostView>,
}

async fn profile(
    ProfilePath { id }: ProfilePath,
    user: AuthenticatedUser,
    State(db): State<Arc<DbClient>>,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Html<ProfileTemplate>)> {
    let profile = db
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;
    let entries = db.fetch_user_posts(id, user.user_id()).await?;
    let posts = PostView::all_for_viewer(entries, user.user_id());

    let (jar, flashes) = flash::take(jar);
    let layout = Layout {
        viewer: Some(user.user().clone()),
        flashes,
    };

    Ok((
        jar,
        Html(ProfileTemplate {
            layout,
            profile,
            posts,
        }),
    ))
}
