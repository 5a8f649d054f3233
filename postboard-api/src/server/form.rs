use crate::server::ServerError;
use axum::{Form as AxumForm, extract::FromRequest};

/// URL encoded form body whose rejection renders like any other [`ServerError`].
#[derive(FromRequest, Debug, Clone, Copy, Default)]
#[from_request(via(AxumForm), rejection(ServerError))]
pub struct Form<T>(pub T);
