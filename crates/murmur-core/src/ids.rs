//! Identifiers
//!
//! All identifiers are opaque strings. Ids minted on the client carry a short
//! kind prefix (`th_`, `cm_`, `in_`) followed by a random alphanumeric suffix.
//! They are never checked against the server: once the server acknowledges an
//! entity the id is committed as-is, and on rollback it is simply discarded.

use crate::effects::RandomEffects;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default length of the random suffix of client-generated ids.
pub const DEFAULT_ID_LENGTH: usize = 24;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw id.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! prefixed_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Prefix used for ids of this kind minted on the client.
            pub const PREFIX: &'static str = $prefix;

            /// Mint a new client-side id with a random suffix of `len` characters.
            pub fn generate<R: RandomEffects + ?Sized>(random: &R, len: usize) -> Self {
                Self(format!("{}{}", Self::PREFIX, random.random_alphanumeric(len)))
            }

            /// Whether this id carries the client-side prefix for its kind.
            pub fn has_client_prefix(&self) -> bool {
                self.0.starts_with(Self::PREFIX)
            }
        }
    };
}

string_id!(
    /// Identifier of a room (the collaborative document a thread lives in).
    RoomId
);
string_id!(
    /// Identifier of a user.
    UserId
);
string_id!(
    /// Identifier of a thread.
    ThreadId
);
string_id!(
    /// Identifier of a comment.
    CommentId
);
string_id!(
    /// Identifier of an inbox notification.
    InboxNotificationId
);

prefixed_id!(ThreadId, "th_");
prefixed_id!(CommentId, "cm_");
prefixed_id!(InboxNotificationId, "in_");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SystemEffects;

    #[test]
    fn generated_ids_carry_kind_prefix() {
        let effects = SystemEffects;
        let thread = ThreadId::generate(&effects, DEFAULT_ID_LENGTH);
        let comment = CommentId::generate(&effects, 8);

        assert!(thread.as_str().starts_with("th_"));
        assert_eq!(thread.as_str().len(), 3 + DEFAULT_ID_LENGTH);
        assert!(comment.has_client_prefix());
        assert_eq!(comment.as_str().len(), 3 + 8);
    }

    #[test]
    fn generated_ids_differ() {
        let effects = SystemEffects;
        let a = ThreadId::generate(&effects, DEFAULT_ID_LENGTH);
        let b = ThreadId::generate(&effects, DEFAULT_ID_LENGTH);
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ThreadId::new("th_1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"th_1\"");
    }
}
