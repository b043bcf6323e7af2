//! Integration tests for netstore
//!
//! End-to-end scenarios over real sockets: each test starts one or more
//! servers on ephemeral ports inside a temp directory and drives them
//! through the client and proxy APIs.
//!
//! Note: Unit-level coverage lives with the modules (paths, locks,
//! staging, config) and in tests/codec_tests.rs and tests/store_tests.rs.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha512};
use tempfile::TempDir;

use netstore::network::Server;
use netstore::protocol::{self, RequestKind, Status};
use netstore::store::FileStore;
use netstore::{BackendClient, Config, NetstoreError, ProxyClient, ProxyConfig};

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    addr: SocketAddr,
    root: PathBuf,
    _temp_dir: TempDir,
}

impl TestServer {
    fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    fn client(&self) -> BackendClient {
        BackendClient::connect(self.addr).unwrap()
    }
}

fn spawn_server() -> TestServer {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("files");

    let config = Config::builder()
        .root(&root)
        .staging_dir(temp_dir.path().join("staging"))
        .listen_addr("127.0.0.1:0")
        .worker_threads(8)
        .build();

    let store = Arc::new(FileStore::open(&config.root).unwrap());
    let mut server = Server::new(config, store);
    let addr = server.bind().unwrap();

    thread::spawn(move || {
        let _ = server.run();
    });

    TestServer {
        addr,
        root,
        _temp_dir: temp_dir,
    }
}

/// An address nothing listens on (bound once, then released).
fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

fn fast_proxy(addrs: Vec<String>) -> ProxyClient {
    ProxyClient::with_config(
        addrs,
        ProxyConfig {
            connect_timeout_ms: 500,
            op_timeout_ms: 2000,
            cooldown_ms: 200,
        },
    )
}

// =============================================================================
// Single-Backend Scenarios
// =============================================================================

#[test]
fn test_happy_path_upload_commit_download() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("a/b.txt", b"hello").unwrap();
    client.commit().unwrap();

    // Visible on disk at the logical path
    assert_eq!(std::fs::read(server.root.join("a/b.txt")).unwrap(), b"hello");

    // And through a second connection
    let mut reader = server.client();
    assert_eq!(reader.download("a/b.txt").unwrap(), b"hello");
}

#[test]
fn test_upload_is_invisible_until_commit() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("pending.bin", b"data").unwrap();

    let mut reader = server.client();
    assert!(matches!(
        reader.download("pending.bin"),
        Err(NetstoreError::NotFound(_))
    ));

    client.commit().unwrap();
    assert_eq!(reader.download("pending.bin").unwrap(), b"data");
}

#[test]
fn test_uploader_sees_own_staged_file() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("mine.txt", b"staged bytes").unwrap();

    // The uploading session reads its own staging before the store
    assert_eq!(client.download("mine.txt").unwrap(), b"staged bytes");
}

#[test]
fn test_hash_mismatch_rejects_upload() {
    let server = spawn_server();

    // Hand-rolled frame: content "hello" declared with the digest of
    // "world". The client API cannot produce this, so go to the wire.
    let mut stream = TcpStream::connect(server.addr).unwrap();
    protocol::write_tag(&mut stream, RequestKind::Upload as u8).unwrap();
    protocol::write_string(&mut stream, "x").unwrap();
    protocol::write_i64(&mut stream, 5).unwrap();
    std::io::Write::write_all(&mut stream, b"hello").unwrap();
    let mut wrong = [0u8; 64];
    wrong.copy_from_slice(&Sha512::digest(b"world"));
    protocol::write_digest(&mut stream, &wrong).unwrap();

    assert_eq!(protocol::read_status(&mut stream).unwrap(), Status::Error);

    // The session survived the rejection: a correct upload still works
    protocol::write_tag(&mut stream, RequestKind::Upload as u8).unwrap();
    protocol::write_string(&mut stream, "y").unwrap();
    protocol::write_i64(&mut stream, 5).unwrap();
    std::io::Write::write_all(&mut stream, b"hello").unwrap();
    let mut right = [0u8; 64];
    right.copy_from_slice(&Sha512::digest(b"hello"));
    protocol::write_digest(&mut stream, &right).unwrap();
    assert_eq!(protocol::read_status(&mut stream).unwrap(), Status::Ok);

    // Nothing under the mismatched name, even after a commit
    protocol::write_tag(&mut stream, RequestKind::Commit as u8).unwrap();
    assert_eq!(protocol::read_status(&mut stream).unwrap(), Status::Ok);

    let mut reader = server.client();
    assert!(matches!(
        reader.download("x"),
        Err(NetstoreError::NotFound(_))
    ));
    assert_eq!(reader.download("y").unwrap(), b"hello");
}

#[test]
fn test_upload_lock_contention() {
    let server = spawn_server();

    let mut session_a = server.client();
    let mut session_b = server.client();

    session_a.upload("k", b"from a").unwrap();

    // B is refused while A holds the lock, but B's session stays usable
    assert!(matches!(
        session_b.upload("k", b"from b"),
        Err(NetstoreError::Rejected("upload"))
    ));

    session_a.commit().unwrap();

    // Lock released on commit; B can now claim the name
    session_b.upload("k", b"from b").unwrap();
    session_b.commit().unwrap();

    let mut reader = server.client();
    assert_eq!(reader.download("k").unwrap(), b"from b");
}

#[test]
fn test_disconnect_rolls_back() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("t", b"uncommitted").unwrap();
    drop(client);

    // Staged bytes are never visible to other sessions
    let mut reader = server.client();
    assert!(matches!(
        reader.download("t"),
        Err(NetstoreError::NotFound(_))
    ));

    // The upload lock is released once server-side cleanup runs
    let mut retry = server.client();
    let mut claimed = false;
    for _ in 0..100 {
        if retry.upload("t", b"second writer").is_ok() {
            claimed = true;
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(claimed, "lock was not released after disconnect");

    retry.commit().unwrap();
    assert_eq!(reader.download("t").unwrap(), b"second writer");
}

#[test]
fn test_rollback_discards_staged_files() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("r1", b"one").unwrap();
    client.upload("r2", b"two").unwrap();
    client.rollback().unwrap();

    // Commit after rollback promotes nothing
    client.commit().unwrap();

    let mut reader = server.client();
    assert!(reader.download("r1").is_err());
    assert!(reader.download("r2").is_err());
    assert!(!server.root.join("r1").exists());
}

#[test]
fn test_reupload_overwrites_staged_bytes() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("s", b"first version").unwrap();
    client.upload("s", b"second version").unwrap();
    client.commit().unwrap();

    let mut reader = server.client();
    assert_eq!(reader.download("s").unwrap(), b"second version");
}

#[test]
fn test_prepare_verifies_staged_files() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("p1", b"alpha").unwrap();
    client.upload("p2", b"beta").unwrap();
    client.prepare().unwrap();
    client.commit().unwrap();
}

#[test]
fn test_zero_length_file_round_trip() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("empty", b"").unwrap();
    client.commit().unwrap();

    let mut reader = server.client();
    assert_eq!(reader.download("empty").unwrap(), b"");
}

#[test]
fn test_nested_directories_created_on_commit() {
    let server = spawn_server();

    let mut client = server.client();
    client.upload("deep/ly/nested/file.txt", b"below").unwrap();
    client.commit().unwrap();

    assert_eq!(
        std::fs::read(server.root.join("deep/ly/nested/file.txt")).unwrap(),
        b"below"
    );
}

#[test]
fn test_path_escape_rejected_but_session_survives() {
    let server = spawn_server();

    let mut client = server.client();
    for name in ["../evil", "/abs/path", "a/../../evil", ""] {
        assert!(matches!(
            client.upload(name, b"payload"),
            Err(NetstoreError::Rejected("upload"))
        ));
    }

    // The rejected payloads were fully consumed: the stream is in sync
    client.upload("good", b"payload").unwrap();
    client.commit().unwrap();

    let mut reader = server.client();
    assert_eq!(reader.download("good").unwrap(), b"payload");
    assert!(matches!(
        reader.download("../evil"),
        Err(NetstoreError::NotFound(_))
    ));
}

#[test]
fn test_large_upload_spans_many_chunks() {
    let server = spawn_server();

    let content: Vec<u8> = (0..300_000u32).map(|i| (i % 241) as u8).collect();

    let mut client = server.client();
    client.upload("big.bin", &content).unwrap();
    client.commit().unwrap();

    let mut reader = server.client();
    assert_eq!(reader.download("big.bin").unwrap(), content);
}

// =============================================================================
// Proxy Scenarios
// =============================================================================

#[test]
fn test_put_get_round_trip_via_proxy() {
    let server = spawn_server();
    let proxy = fast_proxy(vec![server.addr_string()]);

    proxy.put("f.txt", b"round trip").unwrap();
    assert_eq!(proxy.get("f.txt").unwrap(), b"round trip");
}

#[test]
fn test_proxy_upload_fans_out_to_all_backends() {
    let backend_1 = spawn_server();
    let backend_2 = spawn_server();
    let proxy = fast_proxy(vec![backend_1.addr_string(), backend_2.addr_string()]);

    proxy.put("fan.bin", b"both copies").unwrap();

    assert_eq!(
        std::fs::read(backend_1.root.join("fan.bin")).unwrap(),
        b"both copies"
    );
    assert_eq!(
        std::fs::read(backend_2.root.join("fan.bin")).unwrap(),
        b"both copies"
    );
}

#[test]
fn test_proxy_survives_one_backend_down() {
    let live = spawn_server();
    let proxy = fast_proxy(vec![live.addr_string(), dead_addr()]);

    // Upload: one success, one failure → aggregate success. Commit: the
    // cohort is just the live backend.
    proxy.put("f", b"data").unwrap();
    assert_eq!(proxy.get("f").unwrap(), b"data");
}

#[test]
fn test_proxy_download_prefers_first_backend() {
    let backend_1 = spawn_server();
    let backend_2 = spawn_server();

    let mut writer_1 = backend_1.client();
    writer_1.upload("shared", b"from backend 1").unwrap();
    writer_1.commit().unwrap();

    let mut writer_2 = backend_2.client();
    writer_2.upload("shared", b"from backend 2").unwrap();
    writer_2.commit().unwrap();

    let proxy = fast_proxy(vec![backend_1.addr_string(), backend_2.addr_string()]);
    assert_eq!(proxy.get("shared").unwrap(), b"from backend 1");
}

#[test]
fn test_proxy_download_falls_back_on_not_found() {
    let backend_1 = spawn_server();
    let backend_2 = spawn_server();

    // Only backend 2 has the file
    let mut writer = backend_2.client();
    writer.upload("g", b"g-bytes").unwrap();
    writer.commit().unwrap();

    let proxy = fast_proxy(vec![backend_1.addr_string(), backend_2.addr_string()]);
    assert_eq!(proxy.get("g").unwrap(), b"g-bytes");
}

#[test]
fn test_proxy_download_falls_back_on_dead_backend() {
    let live = spawn_server();

    let mut writer = live.client();
    writer.upload("h", b"h-bytes").unwrap();
    writer.commit().unwrap();

    // Dead backend listed first: priority order is tried, failure falls
    // through to the live one
    let proxy = fast_proxy(vec![dead_addr(), live.addr_string()]);
    assert_eq!(proxy.get("h").unwrap(), b"h-bytes");
}

#[test]
fn test_proxy_not_found_when_no_backend_has_file() {
    let backend_1 = spawn_server();
    let backend_2 = spawn_server();
    let proxy = fast_proxy(vec![backend_1.addr_string(), backend_2.addr_string()]);

    assert!(matches!(
        proxy.get("nowhere"),
        Err(NetstoreError::NotFound(_))
    ));
}

#[test]
fn test_proxy_unavailable_when_all_backends_down() {
    let proxy = fast_proxy(vec![dead_addr(), dead_addr()]);

    assert!(matches!(
        proxy.get("anything"),
        Err(NetstoreError::BackendUnavailable)
    ));
    assert!(matches!(
        proxy.upload("anything", b"x"),
        Err(NetstoreError::BackendUnavailable)
    ));
}

#[test]
fn test_proxy_rollback_is_best_effort() {
    let server = spawn_server();
    let proxy = fast_proxy(vec![server.addr_string(), dead_addr()]);

    proxy.upload("rb", b"discard me").unwrap();
    proxy.rollback();

    assert!(matches!(proxy.get("rb"), Err(NetstoreError::NotFound(_))));

    // A fresh transaction on the same proxy still works
    proxy.put("keep", b"kept").unwrap();
    assert_eq!(proxy.get("keep").unwrap(), b"kept");
}

#[test]
fn test_proxy_prepare_then_commit() {
    let backend_1 = spawn_server();
    let backend_2 = spawn_server();
    let proxy = fast_proxy(vec![backend_1.addr_string(), backend_2.addr_string()]);

    proxy.upload("pc.bin", b"prepared").unwrap();
    proxy.prepare().unwrap();
    proxy.commit().unwrap();

    assert_eq!(proxy.get("pc.bin").unwrap(), b"prepared");
}

#[test]
fn test_proxy_transactions_are_independent_per_file() {
    let server = spawn_server();
    let proxy = fast_proxy(vec![server.addr_string()]);

    // Two uploads in one transaction, committed together
    proxy.upload("t1", b"one").unwrap();
    proxy.upload("t2", b"two").unwrap();
    proxy.commit().unwrap();

    assert_eq!(proxy.get("t1").unwrap(), b"one");
    assert_eq!(proxy.get("t2").unwrap(), b"two");
}
