//! The expiration queue (§4.2): a binary heap ordered by ascending deadline, with lazy deletion.
//!
//! A literal sorted list with O(n) reinsertion is the distilled spec's description, but it also
//! explicitly sanctions the alternative used here: a heap plus a generation counter on each node,
//! since `set_deadline` is rare relative to `peek_next_deadline`, which must stay O(1).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::index::NodeIndexes;
use crate::node::{NodeId, ReasonCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    deadline: Instant,
    sequence: u64,
    node: NodeId,
    generation: u64,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.sequence).cmp(&(other.deadline, other.sequence))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap (via `Reverse`) of pending expirations, with stale-entry skipping.
#[derive(Debug, Default)]
pub struct ExpirationQueue {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    next_sequence: u64,
}

impl ExpirationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) `node`'s expiration. Any previously queued entry for this node becomes
    /// stale and will be skipped when popped.
    pub fn set_deadline(
        &mut self,
        indexes: &mut NodeIndexes,
        node: NodeId,
        reason: ReasonCode,
        idle_interval: std::time::Duration,
        now: Instant,
    ) {
        let generation = {
            let Some(n) = indexes.get_mut(node) else {
                return;
            };
            n.generation += 1;
            let retry_count = n.expiration.as_ref().map(|e| e.retry_count).unwrap_or(0);
            n.expiration = Some(crate::node::Expiration {
                deadline: now + idle_interval,
                reason,
                idle_interval,
                retry_count,
            });
            n.generation
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Reverse(HeapEntry {
            deadline: now + idle_interval,
            sequence,
            node,
            generation,
        }));
    }

    /// Clear `node`'s expiration without queuing a new one (e.g. the node is being dropped).
    pub fn cancel(&mut self, indexes: &mut NodeIndexes, node: NodeId) {
        if let Some(n) = indexes.get_mut(node) {
            n.generation += 1;
            n.expiration = None;
        }
    }

    /// Pop every node whose deadline has passed, in ascending deadline order, skipping stale
    /// (superseded or cancelled) entries.
    pub fn pop_expired(&mut self, indexes: &NodeIndexes, now: Instant) -> Vec<NodeId> {
        let mut out = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            if Self::is_current(indexes, &entry) {
                out.push(entry.node);
            }
        }
        out
    }

    pub fn peek_next_deadline(&mut self, indexes: &NodeIndexes) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if Self::is_current(indexes, top) {
                return Some(top.deadline);
            }
            self.heap.pop();
        }
        None
    }

    fn is_current(indexes: &NodeIndexes, entry: &HeapEntry) -> bool {
        indexes
            .get(entry.node)
            .map(|n| n.generation == entry.generation)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::PathHash;
    use crate::node::{Cookie, Node, NodeKind, WatchId};
    use std::path::PathBuf;
    use std::time::Duration;

    fn file(indexes: &mut NodeIndexes, path: &str) -> NodeId {
        indexes.insert(Node {
            kind: NodeKind::File,
            path: PathBuf::from(path),
            rel_offset: 0,
            path_hash: PathHash::of(std::path::Path::new(path)),
            watch_id: WatchId::NONE,
            cookie: Cookie::NONE,
            expiration: None,
            generation: 0,
        })
    }

    #[test]
    fn pops_in_deadline_order() {
        let mut indexes = NodeIndexes::new();
        let mut queue = ExpirationQueue::new();
        let now = Instant::now();

        let a = file(&mut indexes, "/w/a");
        let b = file(&mut indexes, "/w/b");

        queue.set_deadline(&mut indexes, b, ReasonCode::FirstSeen, Duration::from_secs(2), now);
        queue.set_deadline(&mut indexes, a, ReasonCode::FirstSeen, Duration::from_secs(1), now);

        let expired = queue.pop_expired(&indexes, now + Duration::from_secs(3));
        assert_eq!(expired, vec![a, b]);
    }

    #[test]
    fn reinsert_supersedes_stale_entry() {
        let mut indexes = NodeIndexes::new();
        let mut queue = ExpirationQueue::new();
        let now = Instant::now();
        let a = file(&mut indexes, "/w/a");

        queue.set_deadline(&mut indexes, a, ReasonCode::FirstSeen, Duration::from_secs(1), now);
        queue.set_deadline(&mut indexes, a, ReasonCode::Modified, Duration::from_secs(5), now);

        // The first (1s) entry is now stale; at t=2s nothing should fire yet.
        assert!(queue.pop_expired(&indexes, now + Duration::from_secs(2)).is_empty());
        let expired = queue.pop_expired(&indexes, now + Duration::from_secs(6));
        assert_eq!(expired, vec![a]);
    }

    #[test]
    fn cancelled_node_never_fires() {
        let mut indexes = NodeIndexes::new();
        let mut queue = ExpirationQueue::new();
        let now = Instant::now();
        let a = file(&mut indexes, "/w/a");

        queue.set_deadline(&mut indexes, a, ReasonCode::FirstSeen, Duration::from_secs(1), now);
        queue.cancel(&mut indexes, a);

        assert!(queue.pop_expired(&indexes, now + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn peek_next_deadline_skips_stale_head() {
        let mut indexes = NodeIndexes::new();
        let mut queue = ExpirationQueue::new();
        let now = Instant::now();
        let a = file(&mut indexes, "/w/a");

        queue.set_deadline(&mut indexes, a, ReasonCode::FirstSeen, Duration::from_secs(1), now);
        queue.set_deadline(&mut indexes, a, ReasonCode::Modified, Duration::from_secs(10), now);

        assert_eq!(
            queue.peek_next_deadline(&indexes),
            Some(now + Duration::from_secs(10))
        );
    }
}
