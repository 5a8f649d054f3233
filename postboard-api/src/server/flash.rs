//! One-shot messages carried to the next rendered page in a signed cookie.

use axum_extra::extract::{
    SignedCookieJar,
    cookie::{Cookie, SameSite},
};
use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::warn;

pub const FLASH_COOKIE: &str = "flash";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Success,
    Danger,
    Info,
}

impl FlashCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FlashCategory::Success => "success",
            FlashCategory::Danger => "danger",
            FlashCategory::Info => "info",
        }
    }
}

impl Display for FlashCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct FlashMessage {
    pub category: FlashCategory,
    pub message: String,
}

impl FlashMessage {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            category: FlashCategory::Success,
            message: message.into(),
        }
    }

    pub fn danger(message: impl Into<String>) -> Self {
        Self {
            category: FlashCategory::Danger,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            category: FlashCategory::Info,
            message: message.into(),
        }
    }
}

fn read(jar: &SignedCookieJar) -> Vec<FlashMessage> {
    jar.get(FLASH_COOKIE)
        .and_then(|cookie| BASE64_URL_SAFE_NO_PAD.decode(cookie.value()).ok())
        .and_then(|json| serde_json::from_slice(&json).ok())
        .unwrap_or_default()
}

/// Queues `message` behind any messages not yet shown.
#[must_use]
pub fn push(jar: SignedCookieJar, message: FlashMessage) -> SignedCookieJar {
    let mut messages = read(&jar);
    messages.push(message);

    match serde_json::to_vec(&messages) {
        Ok(json) => {
            let cookie = Cookie::build((FLASH_COOKIE, BASE64_URL_SAFE_NO_PAD.encode(json)))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax);
            jar.add(cookie)
        }
        Err(err) => {
            warn!(error = %err, "Dropping flash messages that could not be serialized");
            jar
        }
    }
}

/// Drains the queued messages for display.
#[must_use]
pub fn take(jar: SignedCookieJar) -> (SignedCookieJar, Vec<FlashMessage>) {
    if jar.get(FLASH_COOKIE).is_none() {
        return (jar, Vec::new());
    }

    let messages = read(&jar);
    (jar.remove(Cookie::build(FLASH_COOKIE).path("/")), messages)
}
