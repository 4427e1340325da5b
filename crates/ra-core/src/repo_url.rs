//! Repository URLs.

use std::fmt;

use ra_types::RepoPath;
use url::Url;

use crate::error::{RaError, RaResult};

/// A parsed repository URL such as `repo://host/proj`.
///
/// The scheme selects the backend; what the host and path mean is up to the
/// backend.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RepoUrl {
    url: Url,
}

impl RepoUrl {
    pub fn parse(input: &str) -> RaResult<Self> {
        let url = Url::parse(input).map_err(|e| RaError::InvalidUrl {
            url: input.to_string(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(RaError::InvalidUrl {
                url: input.to_string(),
                reason: "expected scheme://host/path".into(),
            });
        }
        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    /// The path part, sanitized into a repository path.
    pub fn path(&self) -> RaResult<RepoPath> {
        RepoPath::parse(self.url.path()).map_err(|e| RaError::InvalidUrl {
            url: self.url.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl fmt::Debug for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoUrl({})", self.url)
    }
}
