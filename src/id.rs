//! Opaque identifiers for jars, captured requests and subscribers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of digest bytes kept in a generated ID (16 hex characters)
pub const ID_BYTES: usize = 8;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Borrow the ID as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a jar
    JarId
);

string_id!(
    /// Identifier of a captured request, unique within its jar
    RequestId
);

/// Identifier of a live subscription within the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Wrap a raw sequence number
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Generator of opaque hex identifiers
///
/// Each ID is `ID_BYTES` bytes from the thread-local CSPRNG, hex-encoded.
/// Uniqueness is probabilistic; stores that need a guarantee check for
/// collisions themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGenerator;

impl IdGenerator {
    /// Create a generator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Produce the next raw hex identifier
    #[must_use]
    pub fn next_hex(&self) -> String {
        hex::encode(rand::random::<[u8; ID_BYTES]>())
    }

    /// Produce a fresh jar ID
    #[must_use]
    pub fn jar_id(&self) -> JarId {
        JarId(self.next_hex())
    }

    /// Produce a fresh request ID
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        RequestId(self.next_hex())
    }
}
