//! Immutable, structurally shared revision trees.
//!
//! Every revision owns an `Arc<DirNode>` root. A commit copies only the
//! directories on the path to each change (`Arc::make_mut`); everything
//! else is shared with the previous revision, so two revisions hold the
//! same `Arc` exactly when that subtree did not change between them.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use ra_types::{Checksum, NodeKind, PropMap, RepoPath, Revision};

/// A directory version.
#[derive(Clone, Debug, Default)]
pub struct DirNode {
    /// Last revision that changed anything at or below this directory.
    pub changed_rev: Revision,
    /// Last revision that changed this directory's own properties.
    pub props_rev: Revision,
    pub props: PropMap,
    pub entries: BTreeMap<String, Node>,
}

/// A file version.
#[derive(Clone, Debug)]
pub struct FileNode {
    pub changed_rev: Revision,
    pub props: PropMap,
    pub content: Bytes,
    pub checksum: Checksum,
}

impl FileNode {
    pub fn new(changed_rev: Revision, props: PropMap, content: Bytes) -> Self {
        let checksum = Checksum::of(&content);
        Self {
            changed_rev,
            props,
            content,
            checksum,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Node {
    Dir(Arc<DirNode>),
    File(Arc<FileNode>),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Dir(_) => NodeKind::Directory,
            Node::File(_) => NodeKind::File,
        }
    }

    pub fn props(&self) -> &PropMap {
        match self {
            Node::Dir(d) => &d.props,
            Node::File(f) => &f.props,
        }
    }

    pub fn changed_rev(&self) -> Revision {
        match self {
            Node::Dir(d) => d.changed_rev,
            Node::File(f) => f.changed_rev,
        }
    }

    /// `true` if both are the very same node version.
    pub fn same_version(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Dir(a), Node::Dir(b)) => Arc::ptr_eq(a, b),
            (Node::File(a), Node::File(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_dir(&self) -> Option<&Arc<DirNode>> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<FileNode>> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }
}

/// The node at `path` under `root`.
pub fn lookup(root: &Arc<DirNode>, path: &RepoPath) -> Option<Node> {
    let mut current = Node::Dir(Arc::clone(root));
    for name in path.components() {
        let next = match &current {
            Node::Dir(dir) => dir.entries.get(name)?.clone(),
            Node::File(_) => return None,
        };
        current = next;
    }
    Some(current)
}

/// Mutable access to the directory at `path`, copying shared directories
/// on the way down and stamping each with `rev`.
pub fn dir_mut<'a>(
    root: &'a mut Arc<DirNode>,
    path: &RepoPath,
    rev: Revision,
) -> Option<&'a mut DirNode> {
    let mut dir = Arc::make_mut(root);
    dir.changed_rev = rev;
    for name in path.components() {
        match dir.entries.get_mut(name) {
            Some(Node::Dir(child)) => {
                dir = Arc::make_mut(child);
                dir.changed_rev = rev;
            }
            _ => return None,
        }
    }
    Some(dir)
}

/// Every path under `root` with its kind, depth-first in name order. The
/// root itself is not included.
pub fn walk(root: &DirNode) -> Vec<(RepoPath, NodeKind)> {
    fn visit(dir: &DirNode, at: &RepoPath, out: &mut Vec<(RepoPath, NodeKind)>) {
        for (name, node) in &dir.entries {
            let Ok(path) = at.join(name) else { continue };
            out.push((path.clone(), node.kind()));
            if let Node::Dir(child) = node {
                visit(child, &path, out);
            }
        }
    }
    let mut out = Vec::new();
    visit(root, &RepoPath::root(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> RepoPath {
        RepoPath::parse(s).unwrap()
    }

    fn sample() -> Arc<DirNode> {
        let mut root = DirNode::default();
        let mut trunk = DirNode::default();
        trunk.entries.insert(
            "a.txt".into(),
            Node::File(Arc::new(FileNode::new(
                Revision::new(1),
                PropMap::new(),
                Bytes::from_static(b"a"),
            ))),
        );
        root.entries.insert("trunk".into(), Node::Dir(Arc::new(trunk)));
        root.entries
            .insert("branches".into(), Node::Dir(Arc::new(DirNode::default())));
        Arc::new(root)
    }

    #[test]
    fn lookup_follows_components() {
        let root = sample();
        assert_eq!(lookup(&root, &p("trunk/a.txt")).unwrap().kind(), NodeKind::File);
        assert_eq!(lookup(&root, &RepoPath::root()).unwrap().kind(), NodeKind::Directory);
        assert!(lookup(&root, &p("trunk/a.txt/x")).is_none());
        assert!(lookup(&root, &p("tags")).is_none());
    }

    #[test]
    fn dir_mut_copies_only_the_spine() {
        let old = sample();
        let mut new = Arc::clone(&old);
        dir_mut(&mut new, &p("trunk"), Revision::new(2))
            .unwrap()
            .entries
            .remove("a.txt");

        assert!(!Arc::ptr_eq(&old, &new));
        let old_branches = lookup(&old, &p("branches")).unwrap();
        let new_branches = lookup(&new, &p("branches")).unwrap();
        assert!(old_branches.same_version(&new_branches));
        assert!(lookup(&old, &p("trunk/a.txt")).is_some());
        assert!(lookup(&new, &p("trunk/a.txt")).is_none());
        assert_eq!(new.changed_rev, Revision::new(2));
    }

    #[test]
    fn dir_mut_refuses_files() {
        let mut root = sample();
        assert!(dir_mut(&mut root, &p("trunk/a.txt"), Revision::new(2)).is_none());
    }

    #[test]
    fn walk_is_depth_first() {
        let paths: Vec<String> = walk(&sample())
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(paths, vec!["/branches", "/trunk", "/trunk/a.txt"]);
    }
}
