//! Best-effort removal of per-scan scratch files.
//!
//! Every scan works inside its own temporary directory. Teardown must never
//! fail the scan itself: removal errors are logged and counted, and the
//! remaining paths are still attempted.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Remove the given files and directories, best effort.
///
/// Paths that no longer exist are skipped silently. Failures are logged and
/// counted but never abort the remaining removals. Returns the number of
/// paths that could not be removed.
pub fn remove_paths(files: &[PathBuf], dirs: &[PathBuf]) -> usize {
    let mut failures = 0;

    for file in files {
        if !file.exists() {
            continue;
        }
        if let Err(e) = std::fs::remove_file(file) {
            warn!(path = %file.display(), error = %e, "Failed to remove scratch file");
            failures += 1;
        }
    }

    for dir in dirs {
        if !dir.exists() {
            continue;
        }
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "Failed to remove scratch directory");
            failures += 1;
        }
    }

    failures
}

/// A uniquely named scratch directory removed at most once.
///
/// Removal happens either through an explicit [`TempWorkspace::remove_all`]
/// call or through `Drop`, whichever comes first; the second attempt is a
/// no-op.
#[derive(Debug)]
pub struct TempWorkspace {
    root: PathBuf,
    cleaned: bool,
}

impl TempWorkspace {
    /// Create a workspace under the given base directory.
    ///
    /// The directory name combines a timestamp and a random suffix so that
    /// concurrent scans never collide.
    pub fn create_in(base: &Path, prefix: &str) -> std::io::Result<Self> {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}-{}",
            prefix,
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            &suffix[..8]
        );
        let root = base.join(name);

        std::fs::create_dir_all(&root)?;
        debug!(path = %root.display(), "Created scan workspace");

        Ok(Self { root, cleaned: false })
    }

    /// Create a workspace under the system temp directory.
    pub fn create(prefix: &str) -> std::io::Result<Self> {
        Self::create_in(&std::env::temp_dir(), prefix)
    }

    /// Path of the workspace root.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create a subdirectory inside the workspace and return its path.
    pub fn subdir(&self, name: &str) -> std::io::Result<PathBuf> {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove the workspace and everything in it, best effort.
    pub fn remove_all(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        let failures = remove_paths(&[], std::slice::from_ref(&self.root));
        if failures == 0 {
            debug!(path = %self.root.display(), "Removed scan workspace");
        } else {
            warn!(path = %self.root.display(), "Scan workspace left behind");
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        self.remove_all();
    }
}
