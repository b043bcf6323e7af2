//! Server Session
//!
//! One session per accepted TCP connection. Requests on a connection are
//! strictly serial: read one tag byte, dispatch, write the response, loop
//! until the peer disconnects or a fatal error desynchronizes the stream.
//!
//! Disconnect without commit has rollback semantics: staged files are
//! removed and upload locks released, whether the close was clean or not.

use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{NetstoreError, Result};
use crate::protocol::{self, RequestKind, Status, CHUNK_SIZE, DIGEST_LEN};
use crate::store::{Acquired, FileStore, LockRegistry, StagedFile, StagingArea};

/// Handles a single client connection
pub struct Session {
    /// Session id, unique per server process; owns this session's upload locks
    id: u64,

    /// Peer address for logging
    peer: String,

    /// Single stream for sequential read-then-write. Reads go through the
    /// buffer, responses through `get_mut()`, avoiding cloned socket handles.
    stream: BufReader<TcpStream>,

    store: Arc<FileStore>,
    locks: Arc<LockRegistry>,
    staging: StagingArea,
    config: Arc<Config>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        id: u64,
        store: Arc<FileStore>,
        locks: Arc<LockRegistry>,
        config: Arc<Config>,
    ) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        let staging = StagingArea::new(&config.staging_root(), id);
        Ok(Self {
            id,
            peer,
            stream: BufReader::new(stream),
            store,
            locks,
            staging,
            config,
        })
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer
    }

    /// Apply socket timeouts (0 disables).
    pub fn set_timeouts(&self, read_ms: u64, write_ms: u64) -> Result<()> {
        let stream = self.stream.get_ref();
        stream.set_read_timeout((read_ms > 0).then(|| Duration::from_millis(read_ms)))?;
        stream.set_write_timeout((write_ms > 0).then(|| Duration::from_millis(write_ms)))?;
        Ok(())
    }

    /// Serve the connection until the peer closes or a fatal error occurs.
    /// Cleanup (rollback effects) runs on every exit path.
    pub fn handle(&mut self) -> Result<()> {
        let result = self.request_loop();
        self.teardown();
        result
    }

    fn request_loop(&mut self) -> Result<()> {
        loop {
            let tag = match protocol::read_tag(&mut self.stream)? {
                Some(tag) => tag,
                None => {
                    debug!(session = self.id, peer = %self.peer, "peer disconnected");
                    return Ok(());
                }
            };
            let kind = RequestKind::try_from(tag)?;
            debug!(session = self.id, request = ?kind);

            match kind {
                RequestKind::Upload => self.handle_upload()?,
                RequestKind::Download => self.handle_download()?,
                RequestKind::Prepare => self.handle_prepare()?,
                RequestKind::Commit => self.handle_commit()?,
                RequestKind::Rollback => self.handle_rollback()?,
            }
        }
    }

    fn respond(&mut self, status: Status) -> Result<()> {
        protocol::write_status(self.stream.get_mut(), status)
    }

    // -------------------------------------------------------------------------
    // upload
    // -------------------------------------------------------------------------

    /// Receive `name + content + digest`, streaming the content into a
    /// staging file with a running SHA-512.
    ///
    /// Rejections (bad name, lock contention, failed staging write, digest
    /// mismatch) still consume the full declared payload so the connection
    /// stays usable for the next request.
    fn handle_upload(&mut self) -> Result<()> {
        let name = protocol::read_string(&mut self.stream, self.config.max_name_len)?;

        let mut rejection = self.store.resolve(&name).err();

        let mut acquired = None;
        if rejection.is_none() {
            match self.locks.try_acquire(&name, self.id) {
                Ok(a) => acquired = Some(a),
                Err(e) => rejection = Some(e),
            }
        }

        let len = protocol::read_len64(&mut self.stream, self.config.max_file_size)?;

        if let Some(err) = rejection {
            protocol::drain(&mut self.stream, len)?;
            protocol::read_digest(&mut self.stream)?;
            warn!(session = self.id, name = %name, error = %err, "upload rejected");
            return self.respond(Status::Error);
        }
        let acquired = acquired.expect("lock acquired when not rejected");

        // Open the staging file. An already-staged name is truncated, which
        // is the self-overwrite path; the held lock stays in place.
        let mut staged_file = None;
        let mut write_err: Option<NetstoreError> = None;
        match self.staging.create(&name) {
            Ok(v) => staged_file = Some(v),
            Err(e) => write_err = Some(e),
        }

        // Stream the content. A staging write failure does not abort the
        // read: the remaining payload is still consumed and the error is
        // reported once the frame ends. Read failures stay fatal.
        let mut sha = Sha512::new();
        let mut buf = [0u8; CHUNK_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(CHUNK_SIZE as u64) as usize;
            protocol::read_bytes(&mut self.stream, &mut buf[..take])?;
            sha.update(&buf[..take]);
            if write_err.is_none() {
                if let Some((_, file)) = staged_file.as_mut() {
                    if let Err(e) = file.write_all(&buf[..take]) {
                        write_err = Some(NetstoreError::Io(e));
                    }
                }
            }
            remaining -= take as u64;
        }

        let expected = protocol::read_digest(&mut self.stream)?;
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&sha.finalize());

        let failure = match write_err {
            Some(err) => Some(err),
            None if digest != expected => Some(NetstoreError::HashMismatch(name.clone())),
            None => None,
        };

        if let Some(err) = failure {
            if let Some((path, file)) = staged_file {
                drop(file);
                let _ = fs::remove_file(&path);
            }
            self.staging.forget(&name);
            if acquired == Acquired::New {
                self.locks.release(&name, self.id);
            }
            warn!(session = self.id, name = %name, error = %err, "upload failed");
            return self.respond(Status::Error);
        }

        let (path, file) = staged_file.expect("staging file open on success path");
        drop(file);
        self.staging.record(name.clone(), StagedFile { path, size: len, digest });
        debug!(session = self.id, name = %name, size = len, "upload staged");
        self.respond(Status::Ok)
    }

    // -------------------------------------------------------------------------
    // download
    // -------------------------------------------------------------------------

    /// Resolve against this session's staged files first, then the
    /// persistent store, and on a hit re-emit the upload frame shape.
    fn handle_download(&mut self) -> Result<()> {
        let name = protocol::read_string(&mut self.stream, self.config.max_name_len)?;

        let path = if let Some(staged) = self.staging.get(&name) {
            Some(staged.path.clone())
        } else {
            match self.store.lookup(&name) {
                Ok(found) => found,
                Err(err) => {
                    warn!(session = self.id, name = %name, error = %err, "download rejected");
                    None
                }
            }
        };

        let Some(path) = path else {
            debug!(session = self.id, name = %name, "download: not found");
            return self.respond(Status::Error);
        };

        // The file could vanish between lookup and open (a concurrent
        // writer is impossible for this name, but operators exist).
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!(session = self.id, name = %name, error = %err, "download: open failed");
                return self.respond(Status::Error);
            }
        };
        let size = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(session = self.id, name = %name, error = %err, "download: stat failed");
                return self.respond(Status::Error);
            }
        };

        // Success status shares its wire value with the upload tag; the
        // client knows it is inside a download exchange.
        self.respond(Status::Ok)?;
        let stream = self.stream.get_mut();
        protocol::write_string(stream, &name)?;
        protocol::write_i64(stream, size as i64)?;
        let digest = protocol::copy_hashed(&mut file, stream, size)?;
        protocol::write_digest(stream, &digest)?;
        debug!(session = self.id, name = %name, size, "download served");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // prepare / commit / rollback
    // -------------------------------------------------------------------------

    /// Re-verify every staged file from disk. Advisory: commit does not
    /// assume a prior prepare.
    fn handle_prepare(&mut self) -> Result<()> {
        match self.staging.verify() {
            Ok(()) => {
                debug!(session = self.id, files = self.staging.len(), "prepare ok");
                self.respond(Status::Ok)
            }
            Err(err) => {
                warn!(session = self.id, error = %err, "prepare failed");
                self.respond(Status::Error)
            }
        }
    }

    /// Promote every staged file into the store by atomic rename.
    ///
    /// Best-effort on partial failure: files promoted before the failing
    /// rename stay promoted, the rest of the staged set is discarded, and
    /// the transaction ends either way (locks released, staged map empty).
    fn handle_commit(&mut self) -> Result<()> {
        let staged = self.staging.drain_files();
        let mut failed = false;

        for (name, entry) in staged {
            if failed {
                let _ = fs::remove_file(&entry.path);
                continue;
            }
            match self.store.promote(&entry.path, &name) {
                Ok(()) => debug!(session = self.id, name = %name, "committed"),
                Err(err) => {
                    warn!(session = self.id, name = %name, error = %err, "commit failed");
                    let _ = fs::remove_file(&entry.path);
                    failed = true;
                }
            }
        }

        self.locks.release_all(self.id);
        self.staging.remove_dir();
        self.respond(if failed { Status::Error } else { Status::Ok })
    }

    fn handle_rollback(&mut self) -> Result<()> {
        debug!(session = self.id, files = self.staging.len(), "rollback");
        self.staging.clear();
        self.locks.release_all(self.id);
        self.respond(Status::Ok)
    }

    /// Rollback effects on session end, clean or abrupt.
    fn teardown(&mut self) {
        if !self.staging.is_empty() {
            debug!(session = self.id, files = self.staging.len(), "discarding staged uploads");
        }
        self.staging.clear();
        self.locks.release_all(self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Lock release must survive even a panicking handler.
        self.locks.release_all(self.id);
    }
}
