//! Typed ID wrappers for runs, jobs, workers, and related identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Typed string IDs prevent mixing up owner IDs, worker IDs, and
/// tool-call IDs at call sites. These are just strings underneath, with
/// no format requirement beyond what the issuing component enforces.
macro_rules! typed_str_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
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

/// Typed integer IDs for rows owned by the relational store.
macro_rules! typed_row_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// The raw row key.
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

typed_str_id!(OwnerId, "Identifier of the account that owns a run or thread.");
typed_str_id!(WorkerId, "Identifier a worker stamps on claimed jobs and events.");
typed_str_id!(ToolCallId, "The model-issued identifier of one tool invocation.");

typed_row_id!(RunId, "Internal row key of a run.");
typed_row_id!(ThreadId, "Internal row key of a conversation thread.");
typed_row_id!(JobId, "Internal row key of a durable worker job.");
typed_row_id!(BarrierId, "Internal row key of a worker barrier.");
typed_row_id!(EventId, "Monotonic per-run sequence number of a run event.");

/// Stable external identifier of a run. Clients key everything
/// (subscriptions, snapshots, reconnects) by this UUID; the integer
/// [`RunId`] never leaves the process.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunPublicId(pub Uuid);

impl RunPublicId {
    /// Mint a fresh public run identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Borrow the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RunPublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunPublicId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_serialize_transparently() {
        let id = WorkerId::new("worker-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"worker-7\"");
    }

    #[test]
    fn row_ids_serialize_as_integers() {
        let id = JobId::from(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(id.as_i64(), 42);
    }

    #[test]
    fn public_id_round_trips_through_display() {
        let id = RunPublicId::generate();
        let parsed: RunPublicId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
