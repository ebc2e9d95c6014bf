//! The three coordinate maps over the node population (§4.1): path-hash, watch-id, and
//! rename-cookie. All three are kept coherent by [`NodeIndexes::drop`], the single place a node
//! is removed from every collection it participates in.

use std::collections::HashMap;

use crate::hash::PathHash;
use crate::node::{Cookie, Node, NodeArena, NodeId, NodeKind, WatchId};

/// The node population for one watched tree, plus the three lookup maps over it.
#[derive(Debug, Default)]
pub struct NodeIndexes {
    pub(crate) arena: NodeArena,
    by_path_hash: HashMap<PathHash, NodeId>,
    by_watch_id: HashMap<WatchId, NodeId>,
    by_cookie: HashMap<Cookie, NodeId>,
}

impl NodeIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly constructed node, indexing it by whichever of the three keys are valid.
    pub fn insert(&mut self, node: Node) -> NodeId {
        let path_hash = node.path_hash;
        let watch_id = node.watch_id;
        let cookie = node.cookie;
        let kind = node.kind;
        let id = self.arena.insert(node);

        if path_hash.is_valid() {
            self.by_path_hash.insert(path_hash, id);
        }
        if kind.is_watchable() && watch_id.is_watched() {
            self.by_watch_id.insert(watch_id, id);
        }
        if cookie.is_open() {
            self.by_cookie.insert(cookie, id);
        }
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.arena.get_mut(id)
    }

    pub fn find_by_path_hash(&self, hash: PathHash) -> Option<NodeId> {
        self.by_path_hash.get(&hash).copied()
    }

    pub fn find_by_watch(&self, wid: WatchId) -> Option<NodeId> {
        self.by_watch_id.get(&wid).copied()
    }

    pub fn find_by_cookie(&self, cookie: Cookie) -> Option<NodeId> {
        self.by_cookie.get(&cookie).copied()
    }

    /// Register `node`'s current path hash in the primary index. Call after constructing or
    /// rebinding a node's path.
    pub fn reindex_path(&mut self, id: NodeId) {
        if let Some(node) = self.arena.get(id) {
            let hash = node.path_hash;
            if hash.is_valid() {
                self.by_path_hash.insert(hash, id);
            }
        }
    }

    /// Open a rename-pairing cookie for `id`, recording it in both the node and the cookie index.
    pub fn open_cookie(&mut self, id: NodeId, cookie: Cookie) {
        if let Some(node) = self.arena.get_mut(id) {
            node.cookie = cookie;
        }
        self.by_cookie.insert(cookie, id);
    }

    /// Clear a node's rename-pairing cookie, e.g. once its `MOVED_TO` partner has arrived.
    pub fn close_cookie(&mut self, cookie: Cookie) {
        if let Some(id) = self.by_cookie.remove(&cookie)
            && let Some(node) = self.arena.get_mut(id)
        {
            node.cookie = Cookie::NONE;
        }
    }

    /// Remove the stale path-hash entry before a node's path is rebound to a new value (e.g. a
    /// completed rename). The new hash is registered separately via [`Self::reindex_path`].
    pub fn forget_path_hash(&mut self, hash: PathHash) {
        self.by_path_hash.remove(&hash);
    }

    pub fn register_watch(&mut self, id: NodeId, watch_id: WatchId) {
        if let Some(node) = self.arena.get_mut(id) {
            node.watch_id = watch_id;
        }
        if watch_id.is_watched() {
            self.by_watch_id.insert(watch_id, id);
        }
    }

    /// Remove a node from every collection it participates in, and release its arena slot.
    /// Upholds invariant 6: after this call returns, no index holds a reference to `id`.
    pub fn drop(&mut self, id: NodeId) -> Option<Node> {
        let node = self.arena.remove(id)?;
        if node.path_hash.is_valid() {
            self.by_path_hash.remove(&node.path_hash);
        }
        if node.watch_id.is_watched() {
            self.by_watch_id.remove(&node.watch_id);
        }
        if node.cookie.is_open() {
            self.by_cookie.remove(&node.cookie);
        }
        Some(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.arena.iter()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Verify the index-coherence invariants from §3; used by property tests.
    #[cfg(test)]
    fn check_invariants(&self) {
        for (id, node) in self.arena.iter() {
            if node.path_hash.is_valid() {
                assert_eq!(self.by_path_hash.get(&node.path_hash), Some(&id));
            }
            if node.kind.is_watchable() && node.watch_id.is_watched() {
                assert_eq!(self.by_watch_id.get(&node.watch_id), Some(&id));
            }
            if node.cookie.is_open() {
                assert_eq!(self.by_cookie.get(&node.cookie), Some(&id));
            }
        }
    }
}
