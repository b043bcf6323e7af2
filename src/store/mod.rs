//! Store Module
//!
//! The persistent file store plus the machinery that feeds it: logical
//! name validation, per-session staging areas, and the process-wide
//! upload lock registry.

mod locks;
mod paths;
mod staging;

pub use locks::{Acquired, LockRegistry};
pub use paths::normalize;
pub use staging::{StagedFile, StagingArea};

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;

/// The durable, visible file tree under the configured root.
///
/// Every committed file is a regular file at `root/<logical name>`; there
/// are no sidecar files and no index. Concurrent commits to disjoint names
/// proceed independently, so all methods take `&self`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        // Canonicalize so commit renames and resolution agree on one
        // absolute form regardless of how the root was spelled.
        let root = root.canonicalize()?;
        info!(root = %root.display(), "opened file store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a logical name to its absolute path under the root,
    /// rejecting names whose normalization would escape it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(normalize(name)?))
    }

    /// Absolute path of a committed file, or `None` if nothing is committed
    /// under that name. Never sees staged bytes: staging areas live outside
    /// the root.
    pub fn lookup(&self, name: &str) -> Result<Option<PathBuf>> {
        let path = self.resolve(name)?;
        if path.is_file() {
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }

    /// Promote a staged file to its final path by atomic rename, creating
    /// intermediate directories on demand.
    ///
    /// Atomicity holds when the staging area shares the root's filesystem
    /// (the default sibling layout guarantees this). If the rename fails,
    /// e.g. a staging directory configured onto another filesystem, the
    /// file is copied next to its target, fsynced, and renamed into place;
    /// the copy phase is not atomic with respect to the staged source.
    pub fn promote(&self, staged: &Path, name: &str) -> Result<()> {
        let target = self.resolve(name)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if fs::rename(staged, &target).is_ok() {
            return Ok(());
        }

        warn!(
            staged = %staged.display(),
            target = %target.display(),
            "rename failed, falling back to copy into the root's filesystem"
        );
        let mut scratch_name = target.file_name().unwrap_or_default().to_os_string();
        scratch_name.push(".promote-tmp");
        let scratch = target.with_file_name(scratch_name);
        fs::copy(staged, &scratch)?;
        fs::File::open(&scratch)?.sync_all()?;
        fs::rename(&scratch, &target)?;
        fs::remove_file(staged)?;
        Ok(())
    }
}
