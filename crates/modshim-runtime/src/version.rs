//! Semantic versions for plugins and dependency constraints.
//!
//! Versions are written `major.minor[.patch][-prerelease][+build]`. A missing
//! patch number is read as `0`. Prerelease versions sort below the release
//! they precede, and build metadata never affects ordering.

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed semantic version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    /// Create a release version.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse a version string.
    pub fn parse(text: &str) -> RuntimeResult<Self> {
        let invalid = || RuntimeError::InvalidVersion(text.to_string());
        let text_trimmed = text.trim();
        if text_trimmed.is_empty() {
            return Err(invalid());
        }

        let (rest, build) = match text_trimmed.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (text_trimmed, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid());
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        let tag_ok = |tag: &str| {
            !tag.is_empty()
                && tag
                    .split('.')
                    .all(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
        };
        if let Some(pre) = prerelease {
            if !tag_ok(pre) {
                return Err(invalid());
            }
        }
        if let Some(build) = build {
            if !tag_ok(build) {
                return Err(invalid());
            }
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            prerelease: prerelease.map(str::to_string),
            build: build.map(str::to_string),
        })
    }

    /// Whether this is a prerelease version.
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Whether this version satisfies a `>= minimum` constraint.
    pub fn satisfies(&self, minimum: &Version) -> bool {
        self >= minimum
    }
}

fn compare_prerelease(left: &str, right: &str) -> Ordering {
    let mut left_ids = left.split('.');
    let mut right_ids = right.split('.');
    loop {
        match (left_ids.next(), right_ids.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase()),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(l), Some(r)) => compare_prerelease(l, r),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = RuntimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn test_parse_short_forms() {
        assert_eq!(v("1.0"), Version::new(1, 0, 0));
        assert_eq!(v("2.4.1"), Version::new(2, 4, 1));
        assert_eq!(v("1.6.0-beta.2").prerelease.as_deref(), Some("beta.2"));
        assert_eq!(v("1.0.0+ci.5").build.as_deref(), Some("ci.5"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for text in ["", "1", "1.x", "1.0.0.0", "1.0-", "a.b.c", "1.0.0+"] {
            assert!(Version::parse(text).is_err(), "accepted {text:?}");
        }
    }

    #[test]
    fn test_ordering() {
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-alpha.1"));
        assert!(v("1.0.0-alpha.2") < v("1.0.0-alpha.10"));
        assert!(v("1.0.0-2") < v("1.0.0-beta"));
        assert!(v("1.2.0") > v("1.1.9"));
        assert_eq!(v("1.0.0+a"), v("1.0.0+b"));
    }

    #[test]
    fn test_satisfies_minimum() {
        assert!(v("1.2.0").satisfies(&v("1.0")));
        assert!(v("1.0.0").satisfies(&v("1.0")));
        assert!(!v("0.9.9").satisfies(&v("1.0")));
        assert!(!v("1.0.0-beta").satisfies(&v("1.0")));
    }

    #[test]
    fn test_display_round_trips_through_serde() {
        let version = v("3.1.4-rc.1+build.9");
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"3.1.4-rc.1+build.9\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
    }
}
