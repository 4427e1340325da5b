use std::fmt;

use serde::{Deserialize, Serialize};

/// BLAKE3 digest of a file's full text.
///
/// Text deltas carry one for the base they start from and one for the text
/// they must produce; a consumer refuses the delta if either disagrees.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum([u8; 32]);

impl Checksum {
    pub fn of(text: &[u8]) -> Self {
        Self(blake3::hash(text).into())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({}..)", hex::encode(&self.0[..6]))
    }
}
