//! Filesystem change ingestor (§4.4): translates one change record into node-lifecycle
//! transitions against a single tree's indexes and expiration queue.
//!
//! This module only touches in-memory state (and the shadow directory's own lightweight fs
//! operations); registering/removing a kernel watch for a directory, and deciding to kick off a
//! rescan, are reported back as an [`IngestEffect`] for the event loop to act on.

use std::path::PathBuf;
use std::time::Instant;

use crate::node::{Cookie, NodeId, NodeKind, ReasonCode, WatchId};
use crate::tree::WatchedTree;

/// One filesystem change record, already normalized from whatever backend produced it.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Watch id of the directory the event was reported against.
    pub watch_id: WatchId,
    /// Effective absolute path of the affected entry.
    pub path: PathBuf,
    /// Whether the backend told us this path is a directory. Directory records never create File
    /// nodes, even on ambiguous event kinds.
    pub is_dir: bool,
    pub kind: EventKind,
}

/// Event kinds in the dispatch priority order of §4.4's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The kernel dropped events; queue state can no longer be trusted.
    Overflow,
    /// A watch was torn down out from under us.
    Ignored,
    Create,
    CloseWrite,
    MovedFrom { cookie: Cookie },
    MovedTo { cookie: Cookie },
    Delete,
    Other,
}

/// What the event loop must do in response to an ingested record, beyond the index mutation
/// already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEffect {
    /// Nothing further needed.
    None,
    /// Register a kernel watch on a newly discovered directory and ensure its shadow mirror.
    WatchDirectory { node: NodeId, path: PathBuf },
    /// Rescan only this tree (e.g. `MOVED_TO` without a matching `MOVED_FROM` revealed a subtree
    /// we haven't walked yet would be handled as plain creates; reserved for future use).
    RescanTree,
    /// The kernel event queue overflowed; every tree must be rescanned.
    RescanAll,
}

/// Ingest one change record against `tree`, mutating its indexes and expiration queue in place.
pub fn ingest(tree: &mut WatchedTree, record: ChangeRecord, now: Instant) -> IngestEffect {
    if record.kind == EventKind::Overflow {
        tracing::warn!(tree = %tree.root.display(), "kernel event queue overflowed, rescanning all trees");
        return IngestEffect::RescanAll;
    }

    if tree.indexes.find_by_watch(record.watch_id).is_none() {
        tracing::error!(watch_id = record.watch_id.0, "event for an already-invalidated watch id");
        return IngestEffect::None;
    }

    if tree.is_shadow_path(&record.path) {
        return IngestEffect::None;
    }

    if record.kind == EventKind::Ignored {
        if let Some(id) = tree.find_by_path(&record.path) {
            tree.expirations.cancel(&mut tree.indexes, id);
            tree.indexes.drop(id);
        }
        return IngestEffect::None;
    }

    match record.kind {
        EventKind::Create => handle_create(tree, record.path, record.is_dir, now),
        EventKind::CloseWrite => handle_close_write(tree, record.path, now),
        EventKind::MovedFrom { cookie } => handle_moved_from(tree, record.path, cookie),
        EventKind::MovedTo { cookie } => handle_moved_to(tree, record.path, cookie, now),
        EventKind::Delete => handle_delete(tree, &record.path),
        EventKind::Other => handle_other(tree, &record.path, now),
        EventKind::Overflow | EventKind::Ignored => unreachable!("handled above"),
    }
}

fn find_or_create(tree: &mut WatchedTree, path: PathBuf, kind: NodeKind) -> NodeId {
    tree.find_by_path(&path).unwrap_or_else(|| tree.insert_node(path, kind))
}

fn handle_create(tree: &mut WatchedTree, path: PathBuf, is_dir: bool, now: Instant) -> IngestEffect {
    if is_dir {
        let id = find_or_create(tree, path.clone(), NodeKind::Directory);
        if let Err(e) = tree.shadow.ensure_mirror_dir(tree.indexes.get(id).expect("just inserted").relative_path()) {
            tracing::error!(error = %e, path = %path.display(), "failed to create shadow mirror directory");
        }
        IngestEffect::WatchDirectory { node: id, path }
    } else {
        let id = find_or_create(tree, path, NodeKind::File);
        tree.expirations.set_deadline(&mut tree.indexes, id, ReasonCode::FirstSeen, tree.idle_interval, now);
        IngestEffect::None
    }
}

fn handle_close_write(tree: &mut WatchedTree, path: PathBuf, now: Instant) -> IngestEffect {
    let id = find_or_create(tree, path, NodeKind::File);
    let reason = tree
        .indexes
        .get(id)
        .and_then(|n| n.expiration.as_ref())
        .map(|e| e.reason)
        .filter(|r| *r == ReasonCode::FirstSeen)
        .unwrap_or(ReasonCode::Modified);
    tree.expirations.set_deadline(&mut tree.indexes, id, reason, tree.idle_interval, now);
    IngestEffect::None
}

fn handle_moved_from(tree: &mut WatchedTree, path: PathBuf, cookie: Cookie) -> IngestEffect {
    if let Some(id) = tree.find_by_path(&path) {
        tree.indexes.open_cookie(id, cookie);
    }
    IngestEffect::None
}

fn handle_moved_to(tree: &mut WatchedTree, path: PathBuf, cookie: Cookie, now: Instant) -> IngestEffect {
    let Some(id) = tree.indexes.find_by_cookie(cookie) else {
        // No partner MOVED_FROM on record: treat as a plain creation.
        return handle_create(tree, path, false, now);
    };

    let old_hash = tree.indexes.get(id).map(|n| n.path_hash);
    let old_rel = tree.indexes.get(id).map(|n| n.relative_path().to_path_buf());
    let new_hash = crate::hash::PathHash::of(&path);
    let rel_offset = tree.relative_offset(&path);

    if let Some(old_rel) = old_rel
        && let Err(e) = tree.shadow.drop_shadow(&old_rel)
    {
        tracing::error!(error = %e, "failed to unlink shadow file at old path after rename");
    }

    if let Some(node) = tree.indexes.get_mut(id) {
        node.path = path;
        node.path_hash = new_hash;
        node.rel_offset = rel_offset.min(node.path.as_os_str().len());
    }
    if let Some(old_hash) = old_hash {
        tree.indexes.forget_path_hash(old_hash);
    }
    tree.indexes.reindex_path(id);
    tree.indexes.close_cookie(cookie);
    tree.expirations.set_deadline(&mut tree.indexes, id, ReasonCode::Moved, tree.idle_interval, now);
    IngestEffect::None
}

fn handle_delete(tree: &mut WatchedTree, path: &std::path::Path) -> IngestEffect {
    if let Some(id) = tree.find_by_path(path) {
        let is_file = tree.indexes.get(id).map(|n| n.kind == NodeKind::File).unwrap_or(false);
        let rel = tree.indexes.get(id).map(|n| n.relative_path().to_path_buf());
        tree.expirations.cancel(&mut tree.indexes, id);
        tree.indexes.drop(id);
        if is_file
            && let Some(rel) = rel
            && let Err(e) = tree.shadow.drop_shadow(&rel)
        {
            tracing::error!(error = %e, "failed to unlink shadow file after delete");
        }
    }
    IngestEffect::None
}

fn handle_other(tree: &mut WatchedTree, path: &std::path::Path, now: Instant) -> IngestEffect {
    if let Some(id) = tree.find_by_path(path) {
        let reason = tree.indexes.get(id).and_then(|n| n.expiration.as_ref()).map(|e| e.reason).unwrap_or(ReasonCode::Modified);
        tree.expirations.set_deadline(&mut tree.indexes, id, reason, tree.idle_interval, now);
    }
    IngestEffect::None
}
