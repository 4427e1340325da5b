//! Backend ABI versions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RaError;

/// ABI version spoken by this build of the access layer.
pub const RA_ABI_VERSION: AbiVersion = AbiVersion::new(1, 0);

/// A `major.minor` interface version.
///
/// A backend implementing `X` serves a request for `Y` iff the majors are
/// equal and `X.minor >= Y.minor`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AbiVersion {
    pub major: u16,
    pub minor: u16,
}

impl AbiVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Whether a backend at this version can serve `requested`.
    pub fn serves(self, requested: AbiVersion) -> bool {
        self.major == requested.major && self.minor >= requested.minor
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl fmt::Debug for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AbiVersion({self})")
    }
}

impl FromStr for AbiVersion {
    type Err = RaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RaError::Config(format!("invalid ABI version '{s}', expected MAJOR.MINOR"));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for AbiVersion {
    type Error = RaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AbiVersion> for String {
    fn from(v: AbiVersion) -> Self {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_minor_serves_older_request() {
        let backend = AbiVersion::new(1, 3);
        assert!(backend.serves(AbiVersion::new(1, 0)));
        assert!(backend.serves(AbiVersion::new(1, 3)));
        assert!(!backend.serves(AbiVersion::new(1, 4)));
        assert!(!backend.serves(AbiVersion::new(2, 0)));
    }

    #[test]
    fn parse_and_display() {
        let v: AbiVersion = "2.7".parse().unwrap();
        assert_eq!(v, AbiVersion::new(2, 7));
        assert_eq!(v.to_string(), "2.7");
        assert!("2".parse::<AbiVersion>().is_err());
        assert!("a.b".parse::<AbiVersion>().is_err());
    }
}
