//! Entity identifiers.
//!
//! Every addressable entity carries a ULID wrapped in its own newtype, so a
//! run id can never be handed to an API expecting a workflow id. The text
//! form puts a short entity tag in front of the ULID (`run_01H...`), which
//! is what run records, queue diagnostics, and log lines show. Parsing is
//! strict: the tag must match the id type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error produced when an id string does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    /// The entity tag the id type expected, e.g. `"run"`.
    pub expected_tag: &'static str,
    /// The rejected input.
    pub input: String,
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is not a valid {}_ id",
            self.input, self.expected_tag
        )
    }
}

impl std::error::Error for IdParseError {}

/// Declares a ULID-backed id newtype with a tagged text form.
macro_rules! entity_id {
    ($name:ident, tag = $tag:literal, doc = $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Wraps an existing ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// The raw ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Creation time encoded in the id, as milliseconds since the
            /// epoch. Ids of one type sort by this.
            #[must_use]
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(text: &str) -> Result<Self, Self::Err> {
                let reject = || IdParseError {
                    expected_tag: $tag,
                    input: text.to_string(),
                };
                let ulid = text.strip_prefix(concat!($tag, "_")).ok_or_else(reject)?;
                Ulid::from_str(ulid).map(Self).map_err(|_| reject())
            }
        }
    };
}

entity_id!(EventId, tag = "evt", doc = "Identifies a published event.");
entity_id!(SubscriberId, tag = "sub", doc = "Identifies an event subscription.");
entity_id!(WorkflowId, tag = "wf", doc = "Identifies a workflow definition.");
entity_id!(RunId, tag = "run", doc = "Identifies one execution of a workflow.");
entity_id!(JobId, tag = "job", doc = "Identifies a scheduled cron job.");
