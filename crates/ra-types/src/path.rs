//! Canonical repository paths.
//!
//! A [`RepoPath`] is stored without a leading or trailing separator and is
//! displayed with a leading `/` (the root displays as `/`). Parsing is
//! forgiving about separators (`//a///b/` becomes `a/b`) but rejects `.`
//! and `..` components, which have no meaning inside a repository.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A canonical path inside a repository.
///
/// Ordering is component-wise, so a directory sorts immediately before its
/// own descendants (`a` < `a/b` < `a-c`), which is the order an editor
/// drive visits paths in.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoPath(String);

impl RepoPath {
    /// The repository root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and sanitize a path.
    pub fn parse(path: &str) -> Result<Self, TypeError> {
        let mut parts = Vec::new();
        for component in path.split('/') {
            match component {
                "" => continue,
                "." | ".." => {
                    return Err(TypeError::InvalidPath {
                        path: path.to_string(),
                        reason: format!("component {component:?} is not allowed"),
                    })
                }
                c if c.contains('\0') => {
                    return Err(TypeError::InvalidPath {
                        path: path.to_string(),
                        reason: "contains a NUL byte".into(),
                    })
                }
                c => parts.push(c),
            }
        }
        Ok(Self(parts.join("/")))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path without its leading separator (`""` for the root).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a single entry name.
    pub fn join(&self, name: &str) -> Result<Self, TypeError> {
        validate_name(name)?;
        if self.is_root() {
            Ok(Self(name.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, name)))
        }
    }

    /// Append a relative path (which may be the root, a no-op).
    pub fn join_path(&self, relative: &RepoPath) -> Self {
        match (self.is_root(), relative.is_root()) {
            (_, true) => self.clone(),
            (true, false) => relative.clone(),
            (false, false) => Self(format!("{}/{}", self.0, relative.0)),
        }
    }

    /// The parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// The last component, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        Some(self.0.rsplit('/').next().unwrap_or(&self.0))
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Number of components (0 for the root).
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// `true` if `other` is this path or lies beneath it.
    pub fn subsumes(&self, other: &RepoPath) -> bool {
        if self.is_root() || self.0 == other.0 {
            return true;
        }
        other
            .0
            .strip_prefix(&self.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// `true` if `other` lies strictly beneath this path.
    pub fn is_strict_ancestor_of(&self, other: &RepoPath) -> bool {
        self.0 != other.0 && self.subsumes(other)
    }

    /// The part of `self` below `ancestor`, or `None` if `ancestor` does not
    /// subsume `self`.
    pub fn strip_prefix(&self, ancestor: &RepoPath) -> Option<Self> {
        if !ancestor.subsumes(self) {
            return None;
        }
        if ancestor.is_root() {
            return Some(self.clone());
        }
        let rest = &self.0[ancestor.0.len()..];
        Some(Self(rest.trim_start_matches('/').to_string()))
    }

    /// Every proper ancestor from the root down to the parent.
    pub fn ancestors(&self) -> Vec<RepoPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            out.push(p);
        }
        out.reverse();
        out
    }
}

/// Check that `name` is usable as a single directory entry name.
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    let reason = if name.is_empty() {
        "empty name"
    } else if name == "." || name == ".." {
        "relative component"
    } else if name.contains('/') {
        "contains a path separator"
    } else if name.contains('\0') {
        "contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(TypeError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    })
}

impl Ord for RepoPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components().cmp(other.components())
    }
}

impl PartialOrd for RepoPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl fmt::Debug for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoPath(/{})", self.0)
    }
}

impl FromStr for RepoPath {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepoPath {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for RepoPath {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RepoPath> for String {
    fn from(path: RepoPath) -> Self {
        path.to_string()
    }
}
