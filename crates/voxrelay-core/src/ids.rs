//! Branded string identifiers.
//!
//! Session ids come from the client and are never minted here. Correlation
//! keys are random v4 UUIDs, one per published message. Connection ids are
//! time-ordered v7 UUIDs with a `conn_` prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing string without validation.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Unwrap into the underlying string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

branded_id!(
    /// Opaque, client-supplied session identifier. Stable across fragments.
    SessionId
);
branded_id!(
    /// Single-use correlation key attached to one published message.
    CorrelationKey
);
branded_id!(
    /// Identity of one accepted duplex connection.
    ConnectionId
);

impl SessionId {
    /// The sentinel session used when the caller supplies none.
    pub fn default_session() -> Self {
        Self(crate::constants::DEFAULT_SESSION_ID.to_owned())
    }
}

impl CorrelationKey {
    /// Mint a fresh key from a random (v4) UUID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ConnectionId {
    /// Mint a new connection id.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}
