//! Semantic version parsing and ordering
//!
//! Release tags are parsed into [`Version`] values and compared to decide
//! whether an update is available. The grammar is dotted-numeric with an
//! optional pre-release suffix:
//!
//! ```text
//! [v]MAJOR[.MINOR[.PATCH]][-PRERELEASE][+BUILD]
//! ```
//!
//! Leading/trailing whitespace and a leading `v` are ignored, missing minor
//! or patch components default to zero, and build metadata is accepted but
//! does not take part in ordering. A release without a pre-release tag
//! orders above every pre-release of the same numeric triple.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Prerelease;

use crate::error::VersionError;

/// An immutable parsed version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Pre-release tag; empty for a final release
    pub pre: Prerelease,
}

impl Version {
    /// Create a final-release version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Prerelease::EMPTY,
        }
    }

    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Err(VersionError::invalid(input, "empty version string"));
        }

        // Build metadata never affects ordering
        let body = match body.split_once('+') {
            Some((head, build)) => {
                if build.is_empty() {
                    return Err(VersionError::invalid(input, "empty build metadata"));
                }
                head
            }
            None => body,
        };

        let (numbers, pre) = match body.split_once('-') {
            Some((numbers, pre)) => {
                let pre = Prerelease::new(pre)
                    .map_err(|e| VersionError::invalid(input, format!("pre-release: {}", e)))?;
                if pre.is_empty() {
                    return Err(VersionError::invalid(input, "empty pre-release tag"));
                }
                (numbers, pre)
            }
            None => (body, Prerelease::EMPTY),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() > 3 {
            return Err(VersionError::invalid(input, "more than three numeric components"));
        }

        let mut triple = [0u64; 3];
        for (slot, part) in triple.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::invalid(
                    input,
                    format!("'{}' is not a number", part),
                ));
            }
            *slot = part
                .parse()
                .map_err(|_| VersionError::invalid(input, format!("'{}' is out of range", part)))?;
        }

        Ok(Self {
            major: triple[0],
            minor: triple[1],
            patch: triple[2],
            pre,
        })
    }

    /// Whether this is a pre-release
    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// The numeric triple
    pub fn to_tuple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_tuple()
            .cmp(&other.to_tuple())
            .then_with(|| self.pre.cmp(&other.pre))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        Ok(())
    }
}

/// Three-way comparison of two versions
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp(b)
}

/// Whether `candidate` is strictly newer than `current`
pub fn is_newer(current: &Version, candidate: &Version) -> bool {
    candidate > current
}
