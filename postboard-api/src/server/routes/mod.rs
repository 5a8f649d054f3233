use crate::server::ServerRouter;
use axum::Router;

mod auth;
mod posts;
mod users;

pub const LOGIN_PATH: &str = "/login";
pub const SIGNUP_PATH: &str = "/signup";
pub const FEED_PATH: &str = "/feed";

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(auth::routes())
        .merge(posts::routes())
        .merge(users::routes())
}
