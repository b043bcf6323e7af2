//! Per-session staging areas
//!
//! Uploaded bytes land in a private directory unique to the owning session
//! and only become visible in the persistent store on commit. Staged blobs
//! are stored flat under sequence-numbered file names; the mapping back to
//! logical names lives in the session's staged map, so no directory tree
//! has to be mirrored before commit.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{NetstoreError, Result};
use crate::protocol::{self, DIGEST_LEN};

/// Metadata for one staged upload
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Absolute path of the staged blob
    pub path: PathBuf,

    /// Content length in bytes
    pub size: u64,

    /// SHA-512 computed while the bytes arrived
    pub digest: [u8; DIGEST_LEN],
}

/// A session's private staging directory plus its staged-file map
pub struct StagingArea {
    /// `<staging root>/<session id>`
    dir: PathBuf,

    /// Directory exists on disk (created lazily on first upload)
    created: bool,

    /// Next sequence number for staged blob file names
    next_seq: u64,

    /// logical name → staged file
    files: HashMap<String, StagedFile>,
}

impl StagingArea {
    pub fn new(staging_root: &Path, session: u64) -> Self {
        Self {
            dir: staging_root.join(session.to_string()),
            created: false,
            next_seq: 0,
            files: HashMap::new(),
        }
    }

    /// Open a writable staging file for `name`.
    ///
    /// A name already staged by this session is truncated in place, so a
    /// re-upload simply replaces the prior bytes.
    pub fn create(&mut self, name: &str) -> Result<(PathBuf, File)> {
        if !self.created {
            fs::create_dir_all(&self.dir)?;
            self.created = true;
            debug!(dir = %self.dir.display(), "created staging area");
        }

        let path = match self.files.get(name) {
            Some(staged) => staged.path.clone(),
            None => {
                let path = self.dir.join(format!("{}.part", self.next_seq));
                self.next_seq += 1;
                path
            }
        };

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok((path, file))
    }

    /// Record a fully received, verified upload.
    pub fn record(&mut self, name: String, staged: StagedFile) {
        self.files.insert(name, staged);
    }

    /// Look up a staged file by logical name.
    pub fn get(&self, name: &str) -> Option<&StagedFile> {
        self.files.get(name)
    }

    /// Drop the record for `name` without touching disk (used after a
    /// failed re-upload has already destroyed the staged blob).
    pub fn forget(&mut self, name: &str) {
        self.files.remove(name);
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Re-read every staged file from disk and check it still matches its
    /// recorded digest. Advisory: commit does not depend on this.
    pub fn verify(&self) -> Result<()> {
        for (name, staged) in &self.files {
            let mut file = File::open(&staged.path)?;
            let digest = protocol::copy_hashed(&mut file, &mut io::sink(), staged.size)?;
            if digest != staged.digest {
                return Err(NetstoreError::HashMismatch(name.clone()));
            }
        }
        Ok(())
    }

    /// Take ownership of the staged map, leaving the area empty. The caller
    /// (commit) becomes responsible for the files.
    pub fn drain_files(&mut self) -> HashMap<String, StagedFile> {
        std::mem::take(&mut self.files)
    }

    /// Drop all staged bytes and the staging directory. Used by rollback
    /// and by session teardown; safe to call repeatedly.
    pub fn clear(&mut self) {
        for (name, staged) in self.files.drain() {
            if let Err(e) = fs::remove_file(&staged.path) {
                debug!(name = %name, error = %e, "failed to remove staged file");
            }
        }
        self.remove_dir();
    }

    /// Remove the staging directory itself (it is recreated lazily if the
    /// session uploads again).
    pub fn remove_dir(&mut self) {
        if self.created {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                debug!(dir = %self.dir.display(), error = %e, "failed to remove staging dir");
            }
            self.created = false;
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn create_is_lazy_and_reupload_truncates() {
        let root = TempDir::new().unwrap();
        let mut staging = StagingArea::new(root.path(), 7);
        assert!(!root.path().join("7").exists());

        let (path, mut file) = staging.create("a.txt").unwrap();
        file.write_all(b"first").unwrap();
        drop(file);
        staging.record(
            "a.txt".to_string(),
            StagedFile { path: path.clone(), size: 5, digest: [0; DIGEST_LEN] },
        );

        let (path2, file2) = staging.create("a.txt").unwrap();
        drop(file2);
        assert_eq!(path, path2);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn clear_removes_files_and_dir() {
        let root = TempDir::new().unwrap();
        let mut staging = StagingArea::new(root.path(), 3);
        let (path, mut file) = staging.create("x").unwrap();
        file.write_all(b"data").unwrap();
        drop(file);
        staging.record(
            "x".to_string(),
            StagedFile { path, size: 4, digest: [0; DIGEST_LEN] },
        );

        staging.clear();
        assert!(staging.is_empty());
        assert!(!root.path().join("3").exists());
    }
}
