use crate::server::{ServerError, flash::FlashMessage};
use askama::Template;
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use headers::ContentType;
use postboard_common::model::user::User;

/// Renders an askama template as an HTML response.
#[derive(Debug, Clone, Copy, Default)]
pub struct Html<T>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => (TypedHeader(ContentType::html()), html).into_response(),
            Err(err) => ServerError::Template(err).into_response(),
        }
    }
}

/// What every page shows around its content.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Layout {
    pub viewer: Option<User>,
    pub flashes: Vec<FlashMessage>,
}
