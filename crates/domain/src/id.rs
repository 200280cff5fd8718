//! Thing keys — the identifiers used on the relay wire.
//!
//! Devices are addressed by their raw hub id. Users are projected into the
//! same namespace by appending a `|user` marker, so a single string field
//! (`deviceId`) can address either kind of thing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Separator between a raw id and its kind marker.
pub const KIND_SEPARATOR: char = '|';

/// Kind marker for user things.
pub const USER_KIND: &str = "user";

/// A parsed thing identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ThingKey {
    Device(String),
    User(String),
}

impl ThingKey {
    /// Parse a wire identifier.
    ///
    /// `"<id>"` is a device, `"<id>|user"` is a user.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyId`] when the id part is empty, or
    /// [`ValidationError::Unsupported`] for any other kind marker.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let (id, kind) = match raw.split_once(KIND_SEPARATOR) {
            Some((id, kind)) => (id, Some(kind)),
            None => (raw, None),
        };
        if id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        match kind {
            None => Ok(Self::Device(id.to_string())),
            Some(USER_KIND) => Ok(Self::User(id.to_string())),
            Some(other) => Err(ValidationError::Unsupported {
                kind: "thing kind",
                value: other.to_string(),
            }),
        }
    }

    /// The raw hub id, without any kind marker.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Device(id) | Self::User(id) => id,
        }
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl fmt::Display for ThingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(id) => f.write_str(id),
            Self::User(id) => write!(f, "{id}{KIND_SEPARATOR}{USER_KIND}"),
        }
    }
}

impl FromStr for ThingKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ThingKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ThingKey> for String {
    fn from(value: ThingKey) -> Self {
        value.to_string()
    }
}
