use crate::model::{Id, auth::HashedPassword};
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const USER_NAME_MAX_LEN: usize = 100;
pub const EMAIL_MAX_LEN: usize = 120;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct User {
    pub id: Id<UserMarker>,
    pub name: UserName,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NewUser {
    pub name: UserName,
    pub email: Email,
    pub password_hash: HashedPassword,
}

/// A user together with the stored hash needed to check a login attempt.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: HashedPassword,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct UserName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The user name is invalid: {0:?}")]
pub struct InvalidUserNameError(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Email(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The email address is invalid: {0:?}")]
pub struct InvalidEmailError(String);

fn is_acceptable(value: &str, max_len: usize) -> bool {
    !value.trim().is_empty() && value.chars().count() <= max_len
}

impl UserName {
    pub fn new(name: String) -> Result<Self, InvalidUserNameError> {
        if is_acceptable(&name, USER_NAME_MAX_LEN) {
            Ok(Self(name))
        } else {
            Err(InvalidUserNameError(name))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for UserName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Email {
    pub fn new(email: String) -> Result<Self, InvalidEmailError> {
        if is_acceptable(&email, EMAIL_MAX_LEN) {
            Ok(Self(email))
        } else {
            Err(InvalidEmailError(email))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
