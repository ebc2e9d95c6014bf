//! PID file lifecycle: `/tmp/<executable>/<executable>.pid`, holding the daemon's process-group
//! id so `--kill` can find and signal it.

use std::path::PathBuf;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

const EXECUTABLE_NAME: &str = "surveild";

pub fn path() -> PathBuf {
    PathBuf::from("/tmp").join(EXECUTABLE_NAME).join(format!("{EXECUTABLE_NAME}.pid"))
}

/// Write the current process group id to the PID file, creating its parent directory.
pub fn write() -> anyhow::Result<()> {
    let path = path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pgid = nix::unistd::getpgrp();
    std::fs::write(&path, pgid.as_raw().to_string())?;
    Ok(())
}

/// Remove the PID file, ignoring a missing file.
pub fn remove() {
    let path = path();
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to remove PID file"),
    }
}

/// Read the PID file and send `SIGTERM` to the recorded process group.
pub fn kill_running() -> anyhow::Result<()> {
    let path = path();
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("no running daemon found at {}: {e}", path.display()))?;
    let pgid: i32 = contents.trim().parse().map_err(|e| anyhow::anyhow!("malformed PID file {}: {e}", path.display()))?;

    // A negative pid targets the whole process group, matching kill(1)'s `-pgid` convention.
    signal::kill(Pid::from_raw(-pgid), Signal::SIGTERM)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_under_tmp_named_for_executable() {
        let p = path();
        assert_eq!(p, PathBuf::from("/tmp/surveild/surveild.pid"));
    }
}
