use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Number of characters in every link id.
pub const LINK_ID_LENGTH: usize = 5;

/// The alphabet link ids are drawn from.
pub const LINK_ID_ALPHABET: &[u8; 62] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// The short public identifier of a link.
///
/// A valid id is exactly [`LINK_ID_LENGTH`] characters taken from
/// [`LINK_ID_ALPHABET`]. Ids are immutable once assigned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkId(String);

impl LinkId {
    /// Creates a new `LinkId` after validating the input.
    pub fn new(id: impl Into<String>) -> std::result::Result<Self, CoreError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Creates a `LinkId` without validation.
    ///
    /// Use this only for ids produced by trusted internal sources
    /// (e.g. generators that are guaranteed to produce valid output).
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> std::result::Result<(), CoreError> {
        if id.len() != LINK_ID_LENGTH {
            return Err(CoreError::InvalidLinkId(format!(
                "length must be {}, got {}",
                LINK_ID_LENGTH,
                id.len()
            )));
        }

        if !id.bytes().all(|b| LINK_ID_ALPHABET.contains(&b)) {
            return Err(CoreError::InvalidLinkId(format!(
                "must contain only ascii letters and digits: '{}'",
                id
            )));
        }

        Ok(())
    }
}

impl Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LinkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for LinkId {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for LinkId {
    type Error = CoreError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LinkId> for String {
    fn from(value: LinkId) -> Self {
        value.0
    }
}

/// The user a link belongs to.
///
/// Owners are resolved by the authentication layer and handed to the
/// engine; the engine itself never mints them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Owner(Uuid);

impl Owner {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// A fresh random owner, for authentication layers and tests.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for Owner {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for Owner {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::InvalidOwner(format!("'{}': {e}", s)))
    }
}

/// A stored link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// The short public id.
    pub id: LinkId,
    /// The original URL that was shortened.
    pub url: String,
    /// The user who shortened it.
    pub owner: Owner,
    /// Set once the owner deletes the link; never cleared.
    pub deleted: bool,
}

/// What [`Storage::get`](crate::Storage::get) returns for a known id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    pub url: String,
    pub deleted: bool,
}

/// Outcome of adding a URL.
///
/// `Existing` is the "already shortened" signal: the URL was stored before
/// (by any owner) and its original id is handed back instead of a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortened {
    /// A new record was written under this id.
    Created(LinkId),
    /// The URL was already known under this id.
    Existing(LinkId),
}

impl Shortened {
    pub fn id(&self) -> &LinkId {
        match self {
            Shortened::Created(id) | Shortened::Existing(id) => id,
        }
    }

    pub fn into_id(self) -> LinkId {
        match self {
            Shortened::Created(id) | Shortened::Existing(id) => id,
        }
    }

    pub fn already_existed(&self) -> bool {
        matches!(self, Shortened::Existing(_))
    }
}
