use crate::server::ServerError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::{
    SignedCookieJar,
    cookie::{Cookie, Key, SameSite},
};
use postboard_common::{
    model::{
        Id,
        auth::{SessionToken, SessionTokenHash},
        user::{User, UserMarker},
    },
    util::PositiveDuration,
};
use postboard_db::client::DbClient;
use std::sync::Arc;
use time::UtcDateTime;
use tracing::debug;

pub const SESSION_COOKIE: &str = "session";

/// The user behind a valid session cookie.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct AuthenticatedUser {
    user: User,
    token_hash: SessionTokenHash,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(&self) -> Id<UserMarker> {
        self.user.id
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub fn token_hash(&self) -> &SessionTokenHash {
        &self.token_hash
    }
}

/// Like [`AuthenticatedUser`], but anonymous requests are not rejected.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);

async fn resolve_session<S>(
    parts: &Parts,
    state: &S,
) -> Result<Option<AuthenticatedUser>, ServerError>
where
    Arc<DbClient>: FromRef<S>,
    Key: FromRef<S>,
{
    let jar = SignedCookieJar::from_headers(&parts.headers, Key::from_ref(state));
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(None);
    };

    let token: SessionToken = match cookie.value().parse() {
        Ok(token) => token,
        Err(err) => {
            debug!(error = %err, "Ignoring malformed session cookie");
            return Ok(None);
        }
    };
    let token_hash = token.hash()?;

    let Some(session) = Arc::<DbClient>::from_ref(state)
        .fetch_session(&token_hash)
        .await?
    else {
        return Ok(None);
    };

    if session.user.id != token.user_id || session.is_expired_at(UtcDateTime::now()) {
        debug!(user = %token.user_id, "Ignoring stale session");
        return Ok(None);
    }

    Ok(Some(AuthenticatedUser {
        user: session.user,
        token_hash,
    }))
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    Key: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        resolve_session(parts, state)
            .await?
            .ok_or(ServerError::NotLoggedIn)
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    Arc<DbClient>: FromRef<S>,
    Key: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(resolve_session(parts, state).await?))
    }
}

#[must_use]
pub fn session_cookie(token: &SessionToken, ttl: Option<PositiveDuration>) -> Cookie<'static> {
    let mut cookie = Cookie::build((SESSION_COOKIE, token.as_token_str()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    if let Some(ttl) = ttl {
        cookie = cookie.max_age(ttl.get());
    }

    cookie.build()
}

#[must_use]
pub fn session_removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}
