use askama::Template;
use axum::{
    Router,
    extract::{
        DefaultBodyLimit, FromRef, Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::{FormRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::{TypedHeader, extract::cookie::Key};
use headers::ContentType;
use postboard_common::{
    model::{
        Id,
        auth::{PasswordHashError, SessionTokenHashError, SigningKeyError, derive_signing_key},
        post::PostMarker,
        user::UserMarker,
    },
    util::PositiveDuration,
};
use postboard_db::client::{DbClient, DbError};
use std::sync::Arc;
use thiserror::Error;
use tower_http::services::ServeDir;
use tracing::error;

mod auth;
mod flash;
mod form;
mod html;
mod routes;
mod upload;


pub use upload::UploadStore;

pub const UPLOADS_ROUTE: &str = "/static/uploads";

pub type ServerRouter = Router<ServerState>;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct SessionSettings {
    /// `None` keeps sessions alive until logout.
    pub ttl: Option<PositiveDuration>,
}

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub db_client: Arc<DbClient>,
    pub cookie_key: Key,
    pub uploads: Arc<UploadStore>,
    pub session_settings: SessionSettings,
}

impl ServerState {
    pub fn new(
        db_client: DbClient,
        secret_key: &str,
        uploads: UploadStore,
        session_settings: SessionSettings,
    ) -> Result<Self, SigningKeyError> {
        let key_material = derive_signing_key(secret_key)?;

        Ok(Self {
            db_client: Arc::new(db_client),
            cookie_key: Key::from(&key_material),
            uploads: Arc::new(uploads),
            session_settings,
        })
    }
}

pub fn app(state: ServerState, max_upload_bytes: usize) -> Router {
    let uploaded_files = ServeDir::new(state.uploads.dir());

    routes::routes()
        .nest_service(UPLOADS_ROUTE, uploaded_files)
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming form rejected: {0}")]
    FormRejection(#[from] FormRejection),
    #[error("Incoming multipart form rejected: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Reading multipart form failed: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Form field {0:?} is missing")]
    MissingFormField(&'static str),
    #[error("This page requires a logged in user")]
    NotLoggedIn,
    #[error("User {user} does not own post {post}")]
    NotPostOwner {
        post: Id<PostMarker>,
        user: Id<UserMarker>,
    },
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
    #[error("The session token could not be hashed: {0}")]
    SessionTokenHash(#[from] SessionTokenHashError),
    #[error(transparent)]
    PasswordHash(#[from] PasswordHashError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Storing the uploaded image failed: {0}")]
    Upload(std::io::Error),
    #[error("Rendering the page failed: {0}")]
    Template(#[from] askama::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::UserByIdNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::NotLoggedIn => StatusCode::SEE_OTHER,
            ServerError::NotPostOwner { .. } => StatusCode::FORBIDDEN,
            ServerError::MultipartRejection(rejection) => rejection.status(),
            ServerError::Multipart(err) => err.status(),
            ServerError::FormRejection(_) | ServerError::MissingFormField(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::SessionTokenHash(_)
            | ServerError::PasswordHash(_)
            | ServerError::Database(_)
            | ServerError::Upload(_)
            | ServerError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    status: u16,
    reason: &'static str,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::NotLoggedIn = self {
            return Redirect::to(routes::LOGIN_PATH).into_response();
        }

        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let page = ErrorTemplate {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Error"),
        };
        match page.render() {
            Ok(body) => (status, TypedHeader(ContentType::html()), body).into_response(),
            Err(err) => {
                error!(error = %err, "Rendering the error page failed");
                status.into_response()
            }
        }
    }
}
