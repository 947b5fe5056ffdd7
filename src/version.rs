//! Version resolution for a release run.
//!
//! Every artifact and image produced by one run carries the same [`Version`].
//! It comes from one of two tracks:
//! - continuous: a CI build counter shifted by a fixed offset
//! - release: a source-control tag, used verbatim
//!
//! The offset keeps continuous identifiers clear of every tag-derived
//! identifier issued so far. It is a policy, not a uniqueness proof: a tag
//! that happens to spell a number above the offset can still collide.

use crate::errors::InvalidTriggerError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Offset added to the CI build counter on the continuous track.
pub const CONTINUOUS_VERSION_OFFSET: u64 = 150;

/// The identifier tying every artifact and image of one run together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Order two versions by convention: numerically when both are
    /// numbers, lexicographically otherwise.
    pub fn compare(&self, other: &Version) -> Ordering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What started this release run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "track", rename_all = "snake_case")]
pub enum Trigger {
    /// Continuous-integration run with an ever-increasing counter
    Continuous { counter: u64 },
    /// Formal release from a source-control tag
    Release { tag: String },
}

impl Trigger {
    /// Build a trigger from optional CLI inputs. Exactly one must be present.
    pub fn from_parts(
        counter: Option<u64>,
        tag: Option<String>,
    ) -> Result<Self, InvalidTriggerError> {
        match (counter, tag) {
            (Some(counter), None) => Ok(Self::Continuous { counter }),
            (None, Some(tag)) => Ok(Self::Release { tag }),
            (Some(counter), Some(tag)) => Err(InvalidTriggerError::Ambiguous { counter, tag }),
            (None, None) => Err(InvalidTriggerError::Missing),
        }
    }

    pub fn track(&self) -> &'static str {
        match self {
            Self::Continuous { .. } => "continuous",
            Self::Release { .. } => "release",
        }
    }
}

/// Computes the version identifier from a trigger.
#[derive(Debug, Clone, Copy)]
pub struct VersionResolver {
    offset: u64,
}

impl Default for VersionResolver {
    fn default() -> Self {
        Self::new(CONTINUOUS_VERSION_OFFSET)
    }
}

impl VersionResolver {
    pub fn new(offset: u64) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Resolve the version for a trigger.
    ///
    /// Tags are used verbatim: callers must not pass tags containing
    /// characters that are unsafe in a storage path.
    pub fn resolve(&self, trigger: &Trigger) -> Result<Version, InvalidTriggerError> {
        match trigger {
            Trigger::Continuous { counter } => counter
                .checked_add(self.offset)
                .map(|n| Version(n.to_string()))
                .ok_or(InvalidTriggerError::CounterOverflow {
                    counter: *counter,
                    offset: self.offset,
                }),
            Trigger::Release { tag } => {
                if tag.trim().is_empty() {
                    return Err(InvalidTriggerError::EmptyTag);
                }
                Ok(Version(tag.clone()))
            }
        }
    }
}
