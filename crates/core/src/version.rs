//! Protocol version ranges and negotiation.
//!
//! The responder picks the highest version in the intersection of its own
//! range and the requester's. An empty intersection means no conversation.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Widest range a peer may offer (inclusive count of versions).
pub const MAX_VERSION_SPAN: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("min version {min} exceeds max version {max}")]
    Inverted { min: u32, max: u32 },
    #[error("version range {min}..={max} spans more than {MAX_VERSION_SPAN} versions")]
    TooWide { min: u32, max: u32 },
}

/// Inclusive `[min, max]` with `min <= max` and a bounded span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawVersionRange")]
pub struct VersionRange {
    min: u32,
    max: u32,
}

#[derive(Deserialize)]
struct RawVersionRange {
    min: u32,
    max: u32,
}

impl TryFrom<RawVersionRange> for VersionRange {
    type Error = VersionError;

    fn try_from(raw: RawVersionRange) -> Result<Self, Self::Error> {
        VersionRange::new(raw.min, raw.max)
    }
}

impl VersionRange {
    pub fn new(min: u32, max: u32) -> Result<Self, VersionError> {
        if min > max {
            return Err(VersionError::Inverted { min, max });
        }
        if max - min >= MAX_VERSION_SPAN {
            return Err(VersionError::TooWide { min, max });
        }
        Ok(Self { min, max })
    }

    pub const fn single(version: u32) -> Self {
        Self { min: version, max: version }
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn contains(&self, version: u32) -> bool {
        (self.min..=self.max).contains(&version)
    }

    pub fn iter(&self) -> RangeInclusive<u32> {
        self.min..=self.max
    }

    /// Highest version supported by both `self` and `offered`.
    pub fn negotiate(&self, offered: &VersionRange) -> Option<u32> {
        let lo = self.min.max(offered.min);
        let hi = self.max.min(offered.max);
        (lo <= hi).then_some(hi)
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::single(0)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}
