//! Identifier types for the civic ledger.
//!
//! Users are addressed by two keys: a sequential [`InternalUserId`] assigned by
//! the database and an opaque [`PublicUserId`] shown to clients. [`UserKey`] is
//! the "either key" form accepted at every API boundary, and [`UserIdentity`]
//! is the resolved pair written onto every ledger-adjacent row.
//!
//! # Macro-based ID Types
//!
//! The `uuid_id_type!` macro reduces boilerplate for UUID-based identifier types,
//! ensuring consistent implementation of serialization, parsing, and display traits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Macro to define a UUID-based identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `uuid::Uuid` with implementations for:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`
/// - `Serialize`, `Deserialize` (as string)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`
///
/// # Example
///
/// ```ignore
/// uuid_id_type!(MyId, "A custom identifier type.");
/// let id = MyId::generate();
/// let parsed: MyId = id.to_string().parse().unwrap();
/// ```
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

uuid_id_type!(PublicUserId, "The public, opaque user key.\n\nThis is the only user key exposed to clients and other services.");
uuid_id_type!(ChallengeId, "A daily challenge identifier (UUID format).");

/// The internal, sequential user key.
///
/// Assigned by the database when the user is registered and used for every
/// foreign key. Never shown to end users.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalUserId(i64);

impl InternalUserId {
    /// Wrap a raw sequential key.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Return the raw sequential key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for InternalUserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .map(Self)
            .ok_or(IdError::InvalidInternalKey)
    }
}

impl fmt::Debug for InternalUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternalUserId({})", self.0)
    }
}

impl fmt::Display for InternalUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either of the two user keys, as received at an API boundary.
///
/// The text form of an internal key is all digits; anything else must be a
/// UUID and is treated as a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UserKey {
    /// The sequential internal key.
    Internal(InternalUserId),
    /// The public opaque key.
    Public(PublicUserId),
}

impl FromStr for UserKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse().map(Self::Internal);
        }
        s.parse()
            .map(Self::Public)
            .map_err(|_| IdError::InvalidUserKey)
    }
}

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(id) => write!(f, "UserKey::Internal({id})"),
            Self::Public(id) => write!(f, "UserKey::Public({id})"),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(id) => write!(f, "{id}"),
            Self::Public(id) => write!(f, "{id}"),
        }
    }
}

impl TryFrom<String> for UserKey {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UserKey> for String {
    fn from(key: UserKey) -> Self {
        key.to_string()
    }
}

impl From<InternalUserId> for UserKey {
    fn from(id: InternalUserId) -> Self {
        Self::Internal(id)
    }
}

impl From<PublicUserId> for UserKey {
    fn from(id: PublicUserId) -> Self {
        Self::Public(id)
    }
}

/// A resolved user: both keys of the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    /// The sequential internal key.
    pub internal: InternalUserId,
    /// The public opaque key.
    pub public: PublicUserId,
}

impl UserIdentity {
    /// Whether the given key refers to this user.
    #[must_use]
    pub fn matches(&self, key: &UserKey) -> bool {
        match key {
            UserKey::Internal(id) => *id == self.internal,
            UserKey::Public(id) => *id == self.public,
        }
    }
}

/// A ledger entry identifier using ULID for time-ordering.
///
/// Entry IDs sort chronologically, so the textual form can be used directly as
/// an ordered primary key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId(Ulid);

impl EntryId {
    /// Create a new `EntryId` from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Generate a new `EntryId` with the current timestamp.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Return the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> &Ulid {
        &self.0
    }
}

impl FromStr for EntryId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
        Ok(Self(ulid))
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntryId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,

    /// The input is not a positive sequential key.
    #[error("invalid internal user key")]
    InvalidInternalKey,

    /// The input is neither an internal nor a public user key.
    #[error("invalid user key: expected a sequential id or a UUID")]
    InvalidUserKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_id_serde_json() {
        let id = PublicUserId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: PublicUserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn user_key_parses_digits_as_internal() {
        let key: UserKey = "42".parse().unwrap();
        assert_eq!(key, UserKey::Internal(InternalUserId::new(42)));
    }

    #[test]
    fn user_key_parses_uuid_as_public() {
        let id = PublicUserId::generate();
        let key: UserKey = id.to_string().parse().unwrap();
        assert_eq!(key, UserKey::Public(id));
    }

    #[test]
    fn user_key_rejects_garbage_and_zero() {
        assert_eq!("not-a-key".parse::<UserKey>(), Err(IdError::InvalidUserKey));
        assert_eq!("0".parse::<UserKey>(), Err(IdError::InvalidInternalKey));
        assert_eq!("".parse::<UserKey>(), Err(IdError::InvalidUserKey));
    }

    #[test]
    fn identity_matches_either_key() {
        let identity = UserIdentity {
            internal: InternalUserId::new(7),
            public: PublicUserId::generate(),
        };
        assert!(identity.matches(&UserKey::Internal(InternalUserId::new(7))));
        assert!(identity.matches(&UserKey::Public(identity.public)));
        assert!(!identity.matches(&UserKey::Internal(InternalUserId::new(8))));
    }

    #[test]
    fn entry_ids_sort_by_creation_time() {
        let first = EntryId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EntryId::generate();
        assert!(first < second);
        assert!(first.to_string() < second.to_string());
    }

    #[test]
    fn entry_id_serde_json() {
        let id = EntryId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
