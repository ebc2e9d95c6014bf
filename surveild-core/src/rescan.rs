//! Rescan walker (§4.5): a depth-first directory walk that reconciles a watched tree's on-disk
//! state against its shadow tree and in-memory node population.
//!
//! Built on `walkdir::WalkDir` the way the teacher's media scanner walks a library root, rather
//! than hand-rolling the callback-threaded traversal the original tool's `nftw` call used.

use std::path::Path;
use std::time::{Instant, SystemTime};

use walkdir::WalkDir;

use crate::node::{NodeId, NodeKind, ReasonCode};
use crate::tree::{is_ignored_path, WatchedTree};

/// One directory or file freshly discovered or reconciled by a rescan, with the effect the caller
/// (event loop) must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescanEffect {
    /// A directory node was created (or already existed) and needs a kernel watch registered.
    WatchDirectory { node: NodeId, path: std::path::PathBuf },
}

/// Walk `tree.root`, ensuring every directory has a node/watch/shadow-mirror and arming
/// expiration for every file whose shadow disposition implies one.
///
/// Returns the list of directories that need a fresh kernel watch registered by the caller.
pub fn rescan(tree: &mut WatchedTree, now: Instant) -> Vec<RescanEffect> {
    let mut effects = Vec::new();
    let root = tree.root.clone();

    if let Err(e) = tree.shadow.ensure_root() {
        tracing::error!(error = %e, tree = %root.display(), "failed to create shadow root during rescan");
        return effects;
    }

    let shadow_root = tree.shadow.shadow_root().to_path_buf();
    let walk_root = root.clone();
    let walker = WalkDir::new(&root)
        .follow_links(false)
        .same_file_system(true)
        .min_depth(1)
        .into_iter()
        .filter_entry(move |entry| !is_ignored_path(&walk_root, &shadow_root, entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, tree = %root.display(), "rescan walk error");
                continue;
            }
        };

        let path = entry.path();
        if entry.file_type().is_dir() {
            let node = find_or_create_dir(tree, path.to_path_buf());
            if let Some(node_entry) = tree.indexes.get(node)
                && let Err(e) = tree.shadow.ensure_mirror_dir(node_entry.relative_path())
            {
                tracing::error!(error = %e, path = %path.display(), "failed to mirror shadow directory");
            }
            effects.push(RescanEffect::WatchDirectory { node, path: path.to_path_buf() });
        } else if entry.file_type().is_file() {
            let mtime = entry.metadata().ok().and_then(|m| m.modified().ok()).unwrap_or_else(SystemTime::now);
            reconcile_file(tree, path, mtime, now);
        }
    }

    effects
}

fn find_or_create_dir(tree: &mut WatchedTree, path: std::path::PathBuf) -> NodeId {
    tree.find_by_path(&path).unwrap_or_else(|| tree.insert_node(path, NodeKind::Directory))
}

fn reconcile_file(tree: &mut WatchedTree, path: &Path, mtime: std::time::SystemTime, now: Instant) {
    let rel = match path.strip_prefix(&tree.root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => return,
    };

    let disposition = tree.shadow.reconcile(&rel, mtime, tree.idle_interval);
    let Some(reason) = ReasonCode::from_disposition(disposition) else {
        return;
    };

    let id = tree.find_by_path(path).unwrap_or_else(|| tree.insert_node(path.to_path_buf(), NodeKind::File));
    // A rescan finding a brand-new file is reported as Rescan, not FirstSeen: FirstSeen is
    // reserved for the live CREATE event path.
    let reason = if reason == ReasonCode::FirstSeen { ReasonCode::Rescan } else { reason };
    tree.expirations.set_deadline(&mut tree.indexes, id, reason, tree.idle_interval, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchGroup;
    use std::fs;

    fn tree_for(dir: &Path) -> WatchedTree {
        let group = WatchGroup {
            path: dir.to_path_buf(),
            exec: String::new(),
            idle_secs: None,
            rescan_secs: None,
            retry_cap: None,
        };
        WatchedTree::new(&group, std::time::Duration::from_secs(5), std::time::Duration::from_secs(60), 5)
    }

    #[test]
    fn discovers_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"hi").unwrap();

        let mut tree = tree_for(dir.path());
        let now = Instant::now();
        let effects = rescan(&mut tree, now);

        assert!(effects.iter().any(|e| matches!(e, RescanEffect::WatchDirectory { path, .. } if path == &dir.path().join("sub"))));
        assert!(tree.find_by_path(&dir.path().join("a.txt")).is_some());
        assert!(tree.find_by_path(&dir.path().join("sub/b.txt")).is_some());
    }

    #[test]
    fn skips_shadow_and_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config"), b"x").unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();

        let mut tree = tree_for(dir.path());
        rescan(&mut tree, Instant::now());

        assert!(tree.find_by_path(&dir.path().join(".git/config")).is_none());
        assert!(tree.find_by_path(&dir.path().join("a.txt")).is_some());
    }

    #[test]
    fn done_shadow_file_is_not_rearmed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hi").unwrap();

        let mut tree = tree_for(dir.path());
        tree.shadow.ensure_root().unwrap();
        tree.shadow.mark_pending(Path::new("a.txt"), "#!/bin/bash\n").unwrap();
        tree.shadow.mark_done(Path::new("a.txt")).unwrap();

        rescan(&mut tree, Instant::now());
        assert!(tree.find_by_path(&dir.path().join("a.txt")).is_none());
    }
}
