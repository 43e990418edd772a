//! Type-safe ID wrappers for Switchboard.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID newtypes with common functionality.
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new random ID.
            pub fn new() -> Self {
                Self(format!("{}-{}", $prefix, Uuid::new_v4()))
            }

            /// Creates an ID from an existing string (for deserialization/testing).
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Returns the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Session handles are minted by the session provider (a tmux target such as
// "%3" or "build:0.1"); `SessionId::new()` is only used by test providers.
define_id!(SessionId, "sess");
define_id!(HandoffId, "handoff");
define_id!(BarrierId, "barrier");
define_id!(VoteId, "vote");
define_id!(RequestId, "req");
