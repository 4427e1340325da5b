use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A repository revision number.
///
/// Revision 0 is the empty tree every repository starts with. Each
/// successful commit produces exactly the next revision.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The initial, empty revision.
    pub const ZERO: Revision = Revision(0);

    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    /// The raw revision number.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The revision a commit on top of `self` produces.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The preceding revision, or `None` for revision 0.
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(number: u64) -> Self {
        Self(number)
    }
}

impl From<Revision> for u64 {
    fn from(rev: Revision) -> Self {
        rev.0
    }
}

impl FromStr for Revision {
    type Err = TypeError;

    /// Accepts `42` or `r42`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('r').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|e| TypeError::InvalidRevision(format!("{s:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_default() {
        assert_eq!(Revision::default(), Revision::ZERO);
        assert_eq!(Revision::ZERO.get(), 0);
    }

    #[test]
    fn next_and_prev() {
        let r = Revision::new(42);
        assert_eq!(r.next(), Revision::new(43));
        assert_eq!(r.prev(), Some(Revision::new(41)));
        assert_eq!(Revision::ZERO.prev(), None);
    }

    #[test]
    fn display_has_prefix() {
        assert_eq!(Revision::new(7).to_string(), "r7");
        assert_eq!(format!("{:?}", Revision::new(7)), "r7");
    }

    #[test]
    fn parse_with_and_without_prefix() {
        assert_eq!("r12".parse::<Revision>().unwrap(), Revision::new(12));
        assert_eq!("12".parse::<Revision>().unwrap(), Revision::new(12));
        assert!(matches!(
            "head".parse::<Revision>(),
            Err(TypeError::InvalidRevision(_))
        ));
    }

    #[test]
    fn ordering_follows_number() {
        assert!(Revision::new(3) < Revision::new(4));
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&Revision::new(9)).unwrap();
        assert_eq!(json, "9");
    }
}
