pub mod auth;
pub mod image;
pub mod like;
pub mod post;
pub mod user;

use crate::{
    model::{
        auth::InvalidSessionTokenHashError,
        image::InvalidImageFileNameError,
        user::{InvalidEmailError, InvalidUserNameError},
    },
    util::NonPositiveDurationError,
};
use derive_where::derive_where;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    UserName(#[from] InvalidUserNameError),
    #[error(transparent)]
    Email(#[from] InvalidEmailError),
    #[error(transparent)]
    ImageFileName(#[from] InvalidImageFileNameError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
    #[error(transparent)]
    SessionTokenHash(#[from] InvalidSessionTokenHashError),
}

/// Row id of a record, tagged with the kind of record it identifies.
#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<Marker>(i64, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id, PhantomData)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<i64> for Id<Marker> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<Id<Marker>> for i64 {
    fn from(value: Id<Marker>) -> Self {
        value.get()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Id, post::PostMarker, user::UserMarker};

    #[test]
    fn ids_display_as_plain_numbers() {
        let id = Id::<PostMarker>::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(i64::from(id), 42);
    }

    #[test]
    fn ids_deserialize_transparently() {
        use serde::{
            Deserialize,
            de::{IntoDeserializer, value::Error},
        };

        let deserializer = IntoDeserializer::<Error>::into_deserializer(17_i64);
        let id = Id::<UserMarker>::deserialize(deserializer).unwrap();
        assert_eq!(id, Id::new(17));
    }
}
