use crate::server::{
    Result, ServerError, ServerRouter, SessionSettings,
    auth::{AuthenticatedUser, MaybeUser, session_cookie, session_removal_cookie},
    flash::{self, FlashMessage},
    form::Form,
    html::{Html, Layout},
    routes::{FEED_PATH, LOGIN_PATH, SIGNUP_PATH},
};
use askama::Template;
use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::{
    extract::SignedCookieJar,
    routing::{RouterExt, TypedPath},
};
use postboard_common::model::{
    auth::{HashedPassword, SessionToken},
    user::{EMAIL_MAX_LEN, Email, NewUser, USER_NAME_MAX_LEN, UserName},
};
use postboard_db::client::{DbClient, DbError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

pub fn routes() -> ServerRouter {
    Router::new()
        .typed_get(index)
        .typed_get(signup_form)
        .typed_post(signup)
        .typed_get(login_form)
        .typed_post(login)
        .typed_get(logout)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/", rejection(ServerError))]
struct IndexPath();

async fn index(IndexPath(): IndexPath, MaybeUser(user): MaybeUser) -> Redirect {
    if user.is_some() {
        Redirect::to(FEED_PATH)
    } else {
        Redirect::to(LOGIN_PATH)
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/signup", rejection(ServerError))]
struct SignupPath();

#[derive(Template)]
#[template(path = "signup.html")]
struct SignupTemplate {
    layout: Layout,
}

#[derive(Deserialize)]
struct SignupForm {
    name: String,
    email: String,
    password: String,
}

async fn signup_form(
    SignupPath(): SignupPath,
    MaybeUser(viewer): MaybeUser,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Html<SignupTemplate>) {
    let (jar, flashes) = flash::take(jar);
    let layout = Layout {
        viewer: viewer.map(|viewer| viewer.user().clone()),
        flashes,
    };

    (jar, Html(SignupTemplate { layout }))
}

fn signup_rejected(jar: SignedCookieJar, message: &str) -> (SignedCookieJar, Redirect) {
    let jar = flash::push(jar, FlashMessage::danger(message));
    (jar, Redirect::to(SIGNUP_PATH))
}

async fn signup(
    SignupPath(): SignupPath,
    State(db): State<Arc<DbClient>>,
    jar: SignedCookieJar,
    Form(form): Form<SignupForm>,
) -> Result<(SignedCookieJar, Redirect)> {
    let name = match UserName::new(form.name) {
        Ok(name) => name,
        Err(err) => {
            debug!(error = %err, "Rejected signup");
            let message = format!("Please enter a name of at most {USER_NAME_MAX_LEN} characters.");
            return Ok(signup_rejected(jar, &message));
        }
    };
    let email = match Email::new(form.email) {
        Ok(email) => email,
        Err(err) => {
            debug!(error = %err, "Rejected signup");
            let message =
                format!("Please enter an email address of at most {EMAIL_MAX_LEN} characters.");
            return Ok(signup_rejected(jar, &message));
        }
    };

    let new_user = NewUser {
        name,
        email,
        password_hash: HashedPassword::hash(&form.password)?,
    };

    match db.create_user(&new_user).await {
        Ok(user_id) => {
            info!(user = %user_id, "User signed up");
            let jar = flash::push(jar, FlashMessage::success("Signup successful! Please login."));
            Ok((jar, Redirect::to(LOGIN_PATH)))
        }
        Err(DbError::EmailTaken) => {
            debug!("Rejected signup with a taken email address");
            Ok(signup_rejected(
                jar,
                "An account with this email address already exists.",
            ))
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/login", rejection(ServerError))]
struct LoginPath();

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    layout: Layout,
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
    password: String,
}

async fn login_form(
    LoginPath(): LoginPath,
    MaybeUser(viewer): MaybeUser,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Html<LoginTemplate>) {
    let (jar, flashes) = flash::take(jar);
    let layout = Layout {
        viewer: viewer.map(|viewer| viewer.user().clone()),
        flashes,
    };

    (jar, Html(LoginTemplate { layout }))
}

async fn login(
    LoginPath(): LoginPath,
    State(db): State<Arc<DbClient>>,
    State(session_settings): State<SessionSettings>,
    jar: SignedCookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let credentials = match Email::new(form.email) {
        Ok(email) => db.fetch_credentials(&email).await?,
        Err(_) => None,
    };
    let user = match credentials {
        Some(credentials) if credentials.password_hash.verify(&form.password)? => {
            Some(credentials.user)
        }
        _ => None,
    };

    let Some(user) = user else {
        debug!("Rejected login attempt");
        let (jar, mut flashes) = flash::take(jar);
        flashes.push(FlashMessage::danger("Invalid credentials"));
        let layout = Layout {
            viewer: None,
            flashes,
        };
        return Ok((jar, Html(LoginTemplate { layout })).into_response());
    };

    let token = SessionToken::generate_random(user.id);
    db.create_session(&token.hash()?, user.id, session_settings.ttl)
        .await?;
    info!(user = %user.id, "User logged in");

    let jar = jar.add(session_cookie(&token, session_settings.ttl));
    let jar = flash::push(jar, FlashMessage::success(format!("Welcome, {}", user.name)));
    Ok((jar, Redirect::to(FEED_PATH)).into_response())
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/logout", rejection(ServerError))]
struct LogoutPath();

async fn logout(
    LogoutPath(): LogoutPath,
    user: AuthenticatedUser,
    State(db): State<Arc<DbClient>>,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Redirect)> {
    db.delete_session(user.token_hash()).await?;
    info!(user = %user.user_id(), "User logged out");

    let jar = jar.remove(session_removal_cookie());
    let jar = flash::push(jar, FlashMessage::info("Logged out successfully."));
    Ok((jar, Redirect::to(LOGIN_PATH)))
}
