//! The watched-tree model (§3): a configured root paired with its shadow mirror, its three node
//! indexes, and the action template applied to every quiescent file underneath it.

use std::path::{Path, PathBuf};

use crate::config::WatchGroup;
use crate::expiration::ExpirationQueue;
use crate::hash::PathHash;
use crate::index::NodeIndexes;
use crate::node::{Node, NodeId, NodeKind, WatchId};
use crate::shadow::ShadowTree;

/// Hands out monotonically increasing synthetic watch ids.
///
/// `notify` multiplexes every platform backend (inotify, FSEvents, kqueue, ReadDirectoryChangesW)
/// behind one event stream keyed by path, not by a raw per-directory descriptor the way the
/// original inotify-based tool's event records were. We still want the watch-id index from §4.1
/// for invariant-checking and for the "this directory's watch was invalidated" bookkeeping, so we
/// assign our own ids when a directory is registered with the watcher.
#[derive(Debug, Default)]
pub struct WatchIdAllocator {
    next: u64,
}

impl WatchIdAllocator {
    pub fn allocate(&mut self) -> WatchId {
        self.next += 1;
        WatchId(self.next)
    }
}

/// One configured root and everything the engine tracks about it.
#[derive(Debug)]
pub struct WatchedTree {
    pub root: PathBuf,
    pub shadow: ShadowTree,
    pub exec_template: String,
    pub idle_interval: std::time::Duration,
    pub rescan_interval: std::time::Duration,
    pub retry_cap: u32,
    pub indexes: NodeIndexes,
    pub expirations: ExpirationQueue,
    pub watch_ids: WatchIdAllocator,
    /// NodeId of this tree's own root node, which also carries the rescan timer entry.
    pub root_node: Option<NodeId>,
}

impl WatchedTree {
    pub fn new(group: &WatchGroup, default_idle: std::time::Duration, default_rescan: std::time::Duration, default_retry_cap: u32) -> Self {
        let root = group.path.clone();
        Self {
            shadow: ShadowTree::new(root.clone()),
            root,
            exec_template: group.exec.clone(),
            idle_interval: group.idle_secs.map(std::time::Duration::from_secs).unwrap_or(default_idle),
            rescan_interval: group.rescan_secs.map(std::time::Duration::from_secs).unwrap_or(default_rescan),
            retry_cap: group.retry_cap.unwrap_or(default_retry_cap),
            indexes: NodeIndexes::new(),
            expirations: ExpirationQueue::new(),
            watch_ids: WatchIdAllocator::default(),
            root_node: None,
        }
    }

    /// True if `path` lies inside this tree's shadow subtree (invariant: never create a node
    /// there).
    pub fn is_shadow_path(&self, path: &Path) -> bool {
        self.shadow.contains(path)
    }

    /// True if `path` is this root, or lies within it.
    pub fn contains(&self, path: &Path) -> bool {
        path == self.root || path.starts_with(&self.root)
    }

    pub fn relative_offset(&self, path: &Path) -> usize {
        let root_str = self.root.as_os_str().len();
        let path_str = path.as_os_str().len();
        if path_str > root_str { root_str + 1 } else { root_str }
    }

    /// Construct and insert a new node for `path`, registering it by path hash (and, for
    /// directories, allocating and registering a watch id).
    pub fn insert_node(&mut self, path: PathBuf, kind: NodeKind) -> NodeId {
        let rel_offset = self.relative_offset(&path).min(path.as_os_str().len());
        let path_hash = PathHash::of(&path);
        let watch_id = if kind.is_watchable() {
            self.watch_ids.allocate()
        } else {
            WatchId::NONE
        };

        let node = Node {
            kind,
            path,
            rel_offset,
            path_hash,
            watch_id,
            cookie: crate::node::Cookie::NONE,
            expiration: None,
            generation: 0,
        };

        self.indexes.insert(node)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<NodeId> {
        self.indexes.find_by_path_hash(PathHash::of(path))
    }

    /// Skip dot-prefixed path components (except the root itself) and the shadow subtree, per the
    /// rescan walker's filtering rules (§4.5) — also used by the ingestor to drop noise early.
    pub fn should_ignore(&self, path: &Path) -> bool {
        is_ignored_path(&self.root, self.shadow.shadow_root(), path)
    }
}

/// Free-standing form of [`WatchedTree::should_ignore`] that borrows neither `self` nor `tree`,
/// so the rescan walker's `filter_entry` closure can use it without holding a borrow across the
/// whole walk.
pub fn is_ignored_path(root: &Path, shadow_root: &Path, path: &Path) -> bool {
    if path.starts_with(shadow_root) {
        return true;
    }
    if path == root {
        return false;
    }
    let Ok(rel) = path.strip_prefix(root) else {
        return true;
    };
    rel.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(path: &str) -> WatchGroup {
        WatchGroup {
            path: PathBuf::from(path),
            exec: String::new(),
            idle_secs: None,
            rescan_secs: None,
            retry_cap: None,
        }
    }

    #[test]
    fn ignores_shadow_and_dotfiles() {
        let tree = WatchedTree::new(&group("/w"), std::time::Duration::from_secs(5), std::time::Duration::from_secs(60), 5);
        assert!(tree.should_ignore(Path::new("/w/.seen/a")));
        assert!(tree.should_ignore(Path::new("/w/.git")));
        assert!(!tree.should_ignore(Path::new("/w/a.txt")));
        assert!(!tree.should_ignore(Path::new("/w")));
    }

    #[test]
    fn relative_offset_strips_root_and_separator() {
        let tree = WatchedTree::new(&group("/w"), std::time::Duration::from_secs(5), std::time::Duration::from_secs(60), 5);
        let offset = tree.relative_offset(Path::new("/w/sub/a.txt"));
        assert_eq!(&"/w/sub/a.txt"[offset..], "sub/a.txt");
    }

    #[test]
    fn insert_and_find_round_trips() {
        let mut tree = WatchedTree::new(&group("/w"), std::time::Duration::from_secs(5), std::time::Duration::from_secs(60), 5);
        let id = tree.insert_node(PathBuf::from("/w/a.txt"), NodeKind::File);
        assert_eq!(tree.find_by_path(Path::new("/w/a.txt")), Some(id));
    }
}
