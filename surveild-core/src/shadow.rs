//! The shadow tree manager (§4.3): a hidden mirror of the watched root, rooted at `<root>/.seen`,
//! that durably records which files have been actioned, are pending, or are mid-retry.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;
use crate::node::ReasonCode;

const PENDING_MODE: u32 = 0o700;
const DONE_MODE: u32 = 0o440;
const SHADOW_DIR_MODE: u32 = 0o700;

/// Reconciliation disposition for a single file discovered during startup/rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowDisposition {
    /// No shadow file: never seen, or pending first action.
    FirstSeen,
    /// Shadow file present and executable: a previous run was interrupted.
    Retry,
    /// Shadow file present and read-only: already done, nothing to do.
    Done,
    /// Shadow file present, readable, but the original is newer by more than the idle window.
    Modified,
}

/// Owns the `.seen` mirror directory for one watched tree.
#[derive(Debug)]
pub struct ShadowTree {
    root: PathBuf,
    shadow_root: PathBuf,
}

impl ShadowTree {
    pub const DIR_NAME: &'static str = ".seen";

    pub fn new(root: PathBuf) -> Self {
        let shadow_root = root.join(Self::DIR_NAME);
        Self { root, shadow_root }
    }

    pub fn shadow_root(&self) -> &Path {
        &self.shadow_root
    }

    /// True if `path` lies inside the shadow subtree (invariant: no node is ever created there).
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.shadow_root)
    }

    pub fn ensure_root(&self) -> Result<()> {
        self.ensure_dir(&self.shadow_root)
    }

    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        fs::set_permissions(dir, fs::Permissions::from_mode(SHADOW_DIR_MODE))?;
        Ok(())
    }

    /// Ensure the shadow-side directory mirroring `rel_dir` (relative to the watched root) exists.
    pub fn ensure_mirror_dir(&self, rel_dir: &Path) -> Result<()> {
        self.ensure_dir(&self.shadow_root.join(rel_dir))
    }

    fn shadow_path(&self, rel_path: &Path) -> PathBuf {
        self.shadow_root.join(rel_path)
    }

    /// Create or truncate the shadow file for `rel_path`, mode `u+rwx`, containing `script`.
    pub fn mark_pending(&self, rel_path: &Path, script: &str) -> Result<()> {
        let path = self.shadow_path(rel_path);
        if let Some(parent) = path.parent() {
            self.ensure_dir(parent)?;
        }
        fs::write(&path, script)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(PENDING_MODE))?;
        Ok(())
    }

    /// Demote the shadow file to *Done*: truncated, mode `u+r,g+r`.
    pub fn mark_done(&self, rel_path: &Path) -> Result<()> {
        let path = self.shadow_path(rel_path);
        fs::write(&path, b"")?;
        fs::set_permissions(&path, fs::Permissions::from_mode(DONE_MODE))?;
        Ok(())
    }

    /// Unlink the shadow file; a missing file is not an error (it's the desired end state).
    pub fn drop_shadow(&self, rel_path: &Path) -> Result<()> {
        let path = self.shadow_path(rel_path);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Decide what to do with a regular file found by the rescan walker, per §4.3's startup
    /// reconciliation table.
    pub fn reconcile(&self, rel_path: &Path, original_mtime: SystemTime, idle: std::time::Duration) -> ShadowDisposition {
        let shadow_path = self.shadow_path(rel_path);
        let Ok(meta) = fs::metadata(&shadow_path) else {
            return ShadowDisposition::FirstSeen;
        };

        let mode = meta.permissions().mode();
        let executable = mode & 0o100 != 0;
        if executable {
            return ShadowDisposition::Retry;
        }

        if let Ok(shadow_mtime) = meta.modified()
            && let Ok(elapsed) = original_mtime.duration_since(shadow_mtime)
            && elapsed > idle
        {
            return ShadowDisposition::Modified;
        }

        ShadowDisposition::Done
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ReasonCode {
    /// Reconciliation disposition implies a reason when it results in a new node.
    pub fn from_disposition(d: ShadowDisposition) -> Option<ReasonCode> {
        match d {
            ShadowDisposition::FirstSeen => Some(ReasonCode::FirstSeen),
            ShadowDisposition::Retry => Some(ReasonCode::Retry),
            ShadowDisposition::Modified => Some(ReasonCode::Modified),
            ShadowDisposition::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, ShadowTree) {
        let dir = tempdir().unwrap();
        let shadow = ShadowTree::new(dir.path().to_path_buf());
        shadow.ensure_root().unwrap();
        (dir, shadow)
    }

    #[test]
    fn absent_shadow_is_first_seen() {
        let (dir, shadow) = setup();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let disposition = shadow.reconcile(Path::new("a.txt"), SystemTime::now(), Duration::from_secs(5));
        assert_eq!(disposition, ShadowDisposition::FirstSeen);
    }

    #[test]
    fn executable_shadow_is_retry() {
        let (dir, shadow) = setup();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        shadow.mark_pending(Path::new("a.txt"), "#!/bin/bash\n").unwrap();

        let disposition = shadow.reconcile(Path::new("a.txt"), SystemTime::now(), Duration::from_secs(5));
        assert_eq!(disposition, ShadowDisposition::Retry);
    }

    #[test]
    fn readonly_shadow_is_done() {
        let (dir, shadow) = setup();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        shadow.mark_pending(Path::new("a.txt"), "#!/bin/bash\n").unwrap();
        shadow.mark_done(Path::new("a.txt")).unwrap();

        let disposition = shadow.reconcile(Path::new("a.txt"), SystemTime::now(), Duration::from_secs(5));
        assert_eq!(disposition, ShadowDisposition::Done);
    }

    #[test]
    fn drop_shadow_on_missing_file_is_ok() {
        let (_dir, shadow) = setup();
        assert!(shadow.drop_shadow(Path::new("never-existed")).is_ok());
    }

    #[test]
    fn contains_checks_prefix() {
        let (dir, shadow) = setup();
        assert!(shadow.contains(&dir.path().join(".seen/sub/x")));
        assert!(!shadow.contains(&dir.path().join("sub/x")));
    }
}
