//! String newtypes for the identifiers that cross the wire.
//!
//! Object ids, correlation ids, actor ids and labels are all bare JSON
//! strings in frames. Keeping them as separate types stops an object id from
//! being handed to something that wants a label. Freshly minted ids are
//! UUID v7, so they sort roughly by creation time.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

macro_rules! wire_string {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Borrow as `&str`.
            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            /// Unwrap into the owned string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                self.as_str()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

macro_rules! minted {
    ($($name:ident),+) => {$(
        impl $name {
            /// Mint a fresh UUID v7.
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    )+};
}

wire_string! {
    /// Globally unique identifier of a synchronized object.
    ObjectId
}

wire_string! {
    /// Token matching an outbound request to its reply.
    CorrelationId
}

minted!(ObjectId, CorrelationId);

wire_string! {
    /// Identifier of the actor that owns an object.
    ActorId
}

wire_string! {
    /// A label (context or tag) the server groups objects under.
    Label
}

impl Label {
    /// Blank labels are dropped from subscribe and unsubscribe requests.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<ObjectId> for Label {
    fn from(id: ObjectId) -> Self {
        Self(id.0)
    }
}

/// Stable id for a keyed object: hex SHA-256 of `owner`, a NUL byte, `key`.
///
/// Any client writing the same key for the same owner lands on the same id.
#[must_use]
pub fn derive_object_id(owner: &ActorId, key: &str) -> ObjectId {
    let digest = Sha256::new()
        .chain_update(owner.as_str())
        .chain_update([0u8])
        .chain_update(key)
        .finalize();
    ObjectId(format!("{digest:x}"))
}
