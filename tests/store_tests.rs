//! Tests for the persistent store
//!
//! These tests verify:
//! - Logical name resolution stays inside the root
//! - Lookup sees only committed files
//! - Promotion renames staged files into place, creating directories

use std::fs;

use netstore::store::FileStore;
use netstore::NetstoreError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> (TempDir, FileStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path().join("files")).unwrap();
    (temp_dir, store)
}

// =============================================================================
// Resolution Tests
// =============================================================================

#[test]
fn test_open_creates_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("files");
    assert!(!root.exists());

    FileStore::open(&root).unwrap();
    assert!(root.is_dir());
}

#[test]
fn test_resolve_stays_under_root() {
    let (_tmp, store) = setup_store();
    let path = store.resolve("a/b/c.txt").unwrap();
    assert!(path.starts_with(store.root()));
}

#[test]
fn test_resolve_rejects_escapes() {
    let (_tmp, store) = setup_store();
    for name in ["../x", "a/../../x", "/etc/passwd", "", "a//b", "."] {
        assert!(
            matches!(store.resolve(name), Err(NetstoreError::InvalidName(_))),
            "expected rejection for {:?}",
            name
        );
    }
}

// =============================================================================
// Lookup and Promotion Tests
// =============================================================================

#[test]
fn test_lookup_misses_uncommitted_names() {
    let (_tmp, store) = setup_store();
    assert!(store.lookup("missing.txt").unwrap().is_none());
}

#[test]
fn test_promote_then_lookup() {
    let (tmp, store) = setup_store();

    let staged = tmp.path().join("0.part");
    fs::write(&staged, b"payload").unwrap();

    store.promote(&staged, "nested/dir/file.bin").unwrap();
    assert!(!staged.exists());

    let found = store.lookup("nested/dir/file.bin").unwrap().unwrap();
    assert_eq!(fs::read(found).unwrap(), b"payload");
}

#[test]
fn test_promote_replaces_existing_file() {
    let (tmp, store) = setup_store();

    let staged = tmp.path().join("0.part");
    fs::write(&staged, b"first").unwrap();
    store.promote(&staged, "f").unwrap();

    let staged = tmp.path().join("1.part");
    fs::write(&staged, b"second").unwrap();
    store.promote(&staged, "f").unwrap();

    let found = store.lookup("f").unwrap().unwrap();
    assert_eq!(fs::read(found).unwrap(), b"second");
}

#[test]
fn test_lookup_ignores_directories() {
    let (_tmp, store) = setup_store();

    let staged_parent = store.root().join("dir");
    fs::create_dir_all(&staged_parent).unwrap();

    // "dir" exists but is not a regular file
    assert!(store.lookup("dir").unwrap().is_none());
}
